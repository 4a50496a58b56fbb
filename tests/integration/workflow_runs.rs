//! End-to-end runs over mock providers

use deckflow::config::DeckflowConfig;
use deckflow::consistency::ViolationKind;
use deckflow::error::ProviderError;
use deckflow::provider::{ImageProvider, MockProvider, MockResponse, TextProvider};
use deckflow::workflow::{FailureReason, GenerationRequest, RunState};
use deckflow::ApiError;
use std::sync::Arc;
use std::time::Duration;

use crate::integration::{
    fast_config, memory_store, orchestrator, outline_prompts, section_prompts, single_chain,
    SectionSaboteur,
};

/// Stalled calls give up quickly so cancellation is observed without a long wait
fn stalling_config() -> DeckflowConfig {
    let mut config = fast_config();
    config.retry.attempt_timeout_ms = Some(50);
    config
}

#[tokio::test]
async fn repeated_topic_reuses_cached_outline_and_images() {
    let text = Arc::new(MockProvider::offline("text"));
    let image = Arc::new(MockProvider::offline("image"));
    let orch = single_chain(&fast_config(), memory_store(), text.clone(), image.clone());

    let first = orch
        .generate(GenerationRequest::new("Orbital mechanics", 8).with_request_id("first"))
        .await
        .unwrap();
    assert_eq!(first.state, RunState::Finalized);
    assert_eq!(first.completed_sections, 8);
    assert_eq!(image.call_count(), 8);

    let second = orch
        .generate(GenerationRequest::new("Orbital mechanics", 8).with_request_id("second"))
        .await
        .unwrap();
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.state, RunState::Finalized);
    assert_eq!(second.completed_sections, 8);
    assert_eq!(second.total_sections, 8);
    assert!(!second.degraded);

    // Outline and images come from cache the second time
    assert_eq!(outline_prompts(&text).len(), 1);
    assert_eq!(image.call_count(), 8);
    assert!(orch.cache_stats().hits >= 9);

    let (outline, artifacts) = orch.get_artifacts(&second.run_id).unwrap();
    assert_eq!(outline.len(), 8);
    assert_eq!(artifacts.len(), 8);
    for (position, artifact) in artifacts.iter().enumerate() {
        assert_eq!(artifact.section_index, position);
        assert!(!artifact.has_placeholder());
        assert!(artifact.body().contains("Orbital mechanics"));
    }
}

#[tokio::test]
async fn failed_sections_leave_a_partial_run_that_can_be_finalized() {
    let text = Arc::new(SectionSaboteur::new(
        "text",
        vec![
            "Coral reefs: part 2".to_string(),
            "Coral reefs: part 5".to_string(),
        ],
    ));
    let image = Arc::new(MockProvider::offline("image"));
    let orch = orchestrator(
        &fast_config(),
        memory_store(),
        vec![text.clone() as Arc<dyn TextProvider>],
        vec![image as Arc<dyn ImageProvider>],
    );

    let status = orch
        .generate(GenerationRequest::new("Coral reefs", 6))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::PartiallyComplete);
    assert!(status.degraded);
    assert_eq!(status.completed_sections, 4);
    assert_eq!(status.failures.len(), 2);
    let mut failed: Vec<usize> = status.failures.iter().map(|f| f.section_index).collect();
    failed.sort_unstable();
    assert_eq!(failed, vec![1, 4]);
    // Degraded runs are reviewed before they rest
    let report = status.consistency.as_ref().unwrap();
    assert!(!report.requires_failure());

    let (_, artifacts) = orch.get_artifacts(&status.run_id).unwrap();
    let indices: Vec<usize> = artifacts.iter().map(|a| a.section_index).collect();
    assert_eq!(indices, vec![0, 2, 3, 5]);

    let finalized = orch.finalize(&status.run_id).unwrap();
    assert_eq!(finalized.state, RunState::Finalized);
    assert_eq!(finalized.completed_sections, 4);
    assert!(matches!(
        orch.finalize(&status.run_id),
        Err(ApiError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn degraded_run_with_too_many_placeholders_fails_review() {
    let text = Arc::new(SectionSaboteur::new(
        "text",
        vec!["Tide pools: part 1".to_string()],
    ));
    let image = Arc::new(MockProvider::always(
        "image",
        MockResponse::Failure(ProviderError::AuthFailed("bad key".to_string())),
    ));
    let orch = orchestrator(
        &fast_config(),
        memory_store(),
        vec![text as Arc<dyn TextProvider>],
        vec![image as Arc<dyn ImageProvider>],
    );

    let status = orch
        .generate(GenerationRequest::new("Tide pools", 4))
        .await
        .unwrap();
    assert_eq!(
        status.state,
        RunState::Failed(FailureReason::ConsistencyFailed)
    );
    assert_eq!(status.failures.len(), 1);
    let report = status.consistency.unwrap();
    assert!(report
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::PlaceholderRatioExceeded));
    assert!(!report
        .violations
        .iter()
        .any(|v| v.kind == ViolationKind::SectionCountMismatch));
    assert!(matches!(
        orch.finalize(&status.run_id),
        Err(ApiError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn resume_after_partial_run_only_retries_failed_sections() {
    let mut config = fast_config();
    config.workflow.max_consistency_rounds = 0;
    let text = Arc::new(SectionSaboteur::new(
        "text",
        vec!["Glaciers: part 3".to_string()],
    ));
    let image = Arc::new(MockProvider::offline("image"));
    let orch = orchestrator(
        &config,
        memory_store(),
        vec![text.clone() as Arc<dyn TextProvider>],
        vec![image.clone() as Arc<dyn ImageProvider>],
    );

    let partial = orch
        .generate(GenerationRequest::new("Glaciers", 4))
        .await
        .unwrap();
    assert_eq!(partial.state, RunState::PartiallyComplete);
    let section_calls = section_prompts(text.inner()).len();
    let image_calls = image.call_count();

    text.heal();
    let resumed = orch.resume(&partial.run_id).await.unwrap();
    assert_eq!(resumed.state, RunState::Finalized);
    assert_eq!(resumed.completed_sections, 4);
    assert!(resumed.failures.is_empty());

    let retried = section_prompts(text.inner());
    assert_eq!(retried.len(), section_calls + 1);
    assert!(retried
        .last()
        .is_some_and(|p| p.contains("Title: Glaciers: part 3")));
    assert_eq!(image.call_count(), image_calls);
}

#[tokio::test]
async fn cancelling_a_stalled_outline_fails_the_run() {
    let text = Arc::new(MockProvider::always("text", MockResponse::Stall));
    let orch = single_chain(
        &stalling_config(),
        memory_store(),
        text.clone(),
        Arc::new(MockProvider::offline("image")),
    );

    let run_id = orch
        .submit(GenerationRequest::new("Deep sea mining", 3))
        .unwrap();
    while text.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The in-flight call runs out its attempts before the driver observes the cancel
    orch.cancel(&run_id).unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), orch.wait(&run_id))
        .await
        .expect("driver should observe cancellation")
        .unwrap();
    assert_eq!(status.state, RunState::Failed(FailureReason::UserCancelled));

    let stored = orch.checkpoints().latest(&run_id).unwrap().unwrap();
    assert_eq!(stored.state, RunState::Failed(FailureReason::UserCancelled));
    assert!(matches!(
        orch.cancel(&run_id),
        Err(ApiError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn artifacts_are_withheld_until_sections_exist() {
    let text = Arc::new(MockProvider::always("text", MockResponse::Stall));
    let orch = single_chain(
        &stalling_config(),
        memory_store(),
        text.clone(),
        Arc::new(MockProvider::offline("image")),
    );
    let run_id = orch
        .submit(GenerationRequest::new("Cloud physics", 3))
        .unwrap();

    assert!(matches!(
        orch.get_artifacts(&run_id),
        Err(ApiError::ArtifactsNotReady { .. })
    ));
    orch.cancel(&run_id).unwrap();
    orch.wait(&run_id).await.unwrap();
}
