//! Property-based tests for section versions and retry delays

use deckflow::artifact::{etag_version, SectionArtifact, TextContent};
use deckflow::retry::Backoff;
use std::time::Duration;

fn text(body: &str) -> Option<TextContent> {
    Some(TextContent {
        body: body.to_string(),
        placeholder: false,
    })
}

/// Every successor version carries a strictly larger version and a fresh ETag
#[test]
fn test_versions_and_etags_only_move_forward() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(0usize..50, proptest::collection::vec("[a-z ]{0,30}", 1..10)),
            |(index, bodies)| {
                let mut artifact = SectionArtifact::new(index, "Title", text("first"), None);
                let mut seen = vec![artifact.etag.clone()];

                for body in &bodies {
                    let next = artifact.next_version("Title", text(body), None);
                    assert_eq!(next.version, artifact.version + 1);
                    assert_eq!(etag_version(&next.etag), Some(next.version));
                    assert!(!seen.contains(&next.etag));
                    seen.push(next.etag.clone());
                    artifact = next;
                }

                assert_eq!(artifact.version, bodies.len() as u64 + 1);

                Ok(())
            },
        )
        .unwrap();
}

/// Jittered delays stay within half the ceiling and the ceiling itself
#[test]
fn test_backoff_delay_is_bounded() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(1u64..2_000, 1.0f64..4.0, 1u64..60_000, 1u32..40),
            |(base_ms, factor, cap_ms, attempt)| {
                let backoff = Backoff {
                    base: Duration::from_millis(base_ms),
                    factor,
                    cap: Duration::from_millis(cap_ms),
                };
                let ceiling = backoff.ceiling(attempt);
                let delay = backoff.delay(attempt);

                assert!(ceiling <= backoff.cap);
                assert!(ceiling >= backoff.ceiling(attempt.saturating_sub(1).max(1)));
                assert!(delay <= ceiling);
                assert!(delay >= ceiling / 2);

                Ok(())
            },
        )
        .unwrap();
}
