//! Section updates under ETag concurrency control

use deckflow::artifact::etag_version;
use deckflow::provider::MockProvider;
use deckflow::workflow::{GenerationRequest, RunState, SectionUpdate, UpdateTarget};
use deckflow::ApiError;
use futures::future::join;
use std::sync::Arc;
use std::time::Duration;

use crate::integration::{fast_config, memory_store, section_prompts, single_chain};

#[tokio::test]
async fn racing_updates_with_the_same_etag_admit_one_winner() {
    let text = Arc::new(MockProvider::offline("text").with_delay(Duration::from_millis(20)));
    let image = Arc::new(MockProvider::offline("image"));
    let orch = single_chain(&fast_config(), memory_store(), text, image);

    let status = orch
        .generate(GenerationRequest::new("Fermentation", 3))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::Finalized);
    let (_, before) = orch.get_artifacts(&status.run_id).unwrap();
    let original = before[1].clone();

    let first = SectionUpdate::new(UpdateTarget::Content).with_instructions("Focus on bread");
    let second = SectionUpdate::new(UpdateTarget::Content).with_instructions("Focus on cheese");
    let (a, b) = join(
        orch.update_section(&status.run_id, 1, first, &original.etag),
        orch.update_section(&status.run_id, 1, second, &original.etag),
    )
    .await;

    let (winner, loser) = match (a, b) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert!(matches!(
        loser,
        ApiError::Conflict { section_index: 1, .. }
    ));
    assert_eq!(winner.version, original.version + 1);
    assert_eq!(etag_version(&winner.etag), Some(winner.version));

    let (_, after) = orch.get_artifacts(&status.run_id).unwrap();
    assert_eq!(after[1], winner);
    assert_eq!(after[0], before[0]);
    assert_eq!(after[2], before[2]);
}

#[tokio::test]
async fn retitled_section_is_regenerated_with_new_content() {
    let text = Arc::new(MockProvider::offline("text"));
    let image = Arc::new(MockProvider::offline("image"));
    let orch = single_chain(&fast_config(), memory_store(), text.clone(), image.clone());

    let status = orch
        .generate(GenerationRequest::new("Rust ownership", 4))
        .await
        .unwrap();
    let (_, before) = orch.get_artifacts(&status.run_id).unwrap();
    let original = before[2].clone();
    let image_calls = image.call_count();

    let update = SectionUpdate::new(UpdateTarget::Both)
        .with_title("Borrowing rules")
        .with_key_points(vec!["shared references".to_string(), "mutable references".to_string()]);
    let updated = orch
        .update_section(&status.run_id, 2, update, &original.etag)
        .await
        .unwrap();

    assert_eq!(updated.title, "Borrowing rules");
    assert!(updated.body().contains("Borrowing rules"));
    assert_ne!(updated.etag, original.etag);
    assert_ne!(updated.image, original.image);
    assert_eq!(image.call_count(), image_calls + 1);
    assert!(section_prompts(&text)
        .iter()
        .any(|p| p.contains("Key points: shared references; mutable references")));

    // The outline follows the section and the old ETag is now stale
    let (outline, _) = orch.get_artifacts(&status.run_id).unwrap();
    assert_eq!(outline.section(2).unwrap().title, "Borrowing rules");
    let stale = orch
        .update_section(
            &status.run_id,
            2,
            SectionUpdate::new(UpdateTarget::Image),
            &original.etag,
        )
        .await;
    assert!(matches!(stale, Err(ApiError::Conflict { .. })));

    let status = orch.get_status(&status.run_id).unwrap();
    assert_eq!(status.state, RunState::Finalized);
}
