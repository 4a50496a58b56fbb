//! Property-based tests for fingerprint determinism

use deckflow::cache::{canonicalize_text, FingerprintBuilder, OperationKind};
use deckflow::workflow::runner::outline_fingerprint;
use deckflow::workflow::{GenerationRequest, StyleParams};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Whitespace and surrounding padding never change a fingerprint
#[test]
fn test_fingerprint_ignores_formatting() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                proptest::collection::vec("[a-zA-Z0-9]{1,8}", 1..6),
                " {0,3}",
                "[ \t\n]{1,3}",
            ),
            |(words, padding, gap)| {
                let compact = words.join(" ");
                let spaced = format!("{}{}{}", padding, words.join(&gap), padding);

                let a = FingerprintBuilder::new(OperationKind::Outline)
                    .param("topic", &compact)
                    .build();
                let b = FingerprintBuilder::new(OperationKind::Outline)
                    .param("topic", &spaced)
                    .build();

                assert_eq!(canonicalize_text(&spaced), compact);
                assert_eq!(a, b);

                Ok(())
            },
        )
        .unwrap();
}

/// Parameter insertion order is irrelevant, the operation kind is not
#[test]
fn test_fingerprint_is_order_independent_and_kind_separated() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &proptest::collection::btree_map("[a-z]{1,6}", "[a-z ]{0,12}", 1..8),
            |params| {
                let forward = params
                    .iter()
                    .fold(FingerprintBuilder::new(OperationKind::SectionText), |b, (k, v)| {
                        b.param(k, v)
                    });
                let backward = params
                    .iter()
                    .rev()
                    .fold(FingerprintBuilder::new(OperationKind::SectionText), |b, (k, v)| {
                        b.param(k, v)
                    });
                let as_image = params
                    .iter()
                    .fold(FingerprintBuilder::new(OperationKind::SectionImage), |b, (k, v)| {
                        b.param(k, v)
                    });

                assert_eq!(forward.build(), backward.build());
                prop_assume!(forward.build() != as_image.build());

                Ok(())
            },
        )
        .unwrap();
}

/// Requests with the same topic, count and style share an outline key
/// regardless of request id or style map order
#[test]
fn test_outline_fingerprint_depends_only_on_content() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                "[A-Za-z ]{1,40}",
                3usize..20,
                proptest::collection::vec(("[a-z]{1,5}", "[a-z]{1,5}"), 0..4),
                "[a-z0-9]{4,12}",
                "[a-z0-9]{4,12}",
            ),
            |(topic, sections, extras, id_a, id_b)| {
                let extra: BTreeMap<String, String> = extras.into_iter().collect();
                let style = StyleParams {
                    extra,
                    ..StyleParams::default()
                };

                let a = GenerationRequest::new(topic.clone(), sections)
                    .with_style(style.clone())
                    .with_request_id(id_a);
                let b = GenerationRequest::new(topic.clone(), sections)
                    .with_style(style)
                    .with_request_id(id_b);
                let other = GenerationRequest::new(topic, sections + 1);

                assert_eq!(outline_fingerprint(&a), outline_fingerprint(&b));
                assert_ne!(outline_fingerprint(&a), outline_fingerprint(&other));

                Ok(())
            },
        )
        .unwrap();
}
