//! Provider chains: retry, fallback and circuit breaking across a run

use deckflow::error::ProviderError;
use deckflow::provider::{Capability, ImageProvider, MockProvider, MockResponse, TextProvider};
use deckflow::retry::BreakerState;
use deckflow::workflow::{FailureReason, GenerationRequest, RunState};
use std::sync::Arc;

use crate::integration::{fast_config, memory_store, orchestrator};

#[tokio::test(start_paused = true)]
async fn stalled_image_provider_falls_back_and_opens_its_breaker() {
    let mut config = fast_config();
    config.retry.attempt_timeout_ms = Some(50);
    config.retry.breaker_failure_threshold = 3;
    config.retry.breaker_cooldown_ms = 600_000;

    let stalled = Arc::new(MockProvider::always("image-a", MockResponse::Stall));
    let backup = Arc::new(MockProvider::offline("image-b"));
    let orch = orchestrator(
        &config,
        memory_store(),
        vec![Arc::new(MockProvider::offline("text")) as Arc<dyn TextProvider>],
        vec![
            stalled.clone() as Arc<dyn ImageProvider>,
            backup.clone() as Arc<dyn ImageProvider>,
        ],
    );

    let status = orch
        .generate(GenerationRequest::new("Exoplanet atmospheres", 6))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::Finalized);

    let (_, artifacts) = orch.get_artifacts(&status.run_id).unwrap();
    assert_eq!(artifacts.len(), 6);
    for artifact in &artifacts {
        let image = artifact.image.as_ref().unwrap();
        assert_eq!(image.provider, "image-b");
        assert!(!image.placeholder);
        assert!(image.image_ref.starts_with("mock://image-b/"));
    }

    assert_eq!(orch.breakers().state(Capability::Image, "image-a"), BreakerState::Open);
    assert_eq!(orch.breakers().state(Capability::Image, "image-b"), BreakerState::Closed);
    assert_eq!(backup.call_count(), 6);
    // Once open, the stalled provider is skipped rather than waited on
    assert!(stalled.call_count() < 6 * config.retry.max_attempts as usize);
}

fn failing_images() -> Arc<MockProvider> {
    Arc::new(MockProvider::always(
        "image",
        MockResponse::Failure(ProviderError::AuthFailed("bad key".to_string())),
    ))
}

#[tokio::test]
async fn exhausted_image_chain_degrades_to_placeholders() {
    let mut config = fast_config();
    config.consistency.max_placeholder_ratio = 1.0;
    let orch = orchestrator(
        &config,
        memory_store(),
        vec![Arc::new(MockProvider::offline("text")) as Arc<dyn TextProvider>],
        vec![failing_images() as Arc<dyn ImageProvider>],
    );

    let status = orch
        .generate(GenerationRequest::new("Migratory birds", 4))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::PartiallyComplete);
    assert!(status.degraded);
    assert_eq!(status.completed_sections, 4);

    let (_, artifacts) = orch.get_artifacts(&status.run_id).unwrap();
    assert!(artifacts.iter().all(|a| a.has_placeholder()));
    assert!(artifacts.iter().all(|a| !a.is_text_empty()));
}

#[tokio::test]
async fn too_many_placeholders_fail_the_run() {
    let orch = orchestrator(
        &fast_config(),
        memory_store(),
        vec![Arc::new(MockProvider::offline("text")) as Arc<dyn TextProvider>],
        vec![failing_images() as Arc<dyn ImageProvider>],
    );

    let status = orch
        .generate(GenerationRequest::new("Migratory birds", 4))
        .await
        .unwrap();
    assert_eq!(
        status.state,
        RunState::Failed(FailureReason::ConsistencyFailed)
    );
    let report = status.consistency.unwrap();
    assert!(report.requires_failure());
}

#[tokio::test]
async fn transient_text_failures_are_retried_on_the_same_provider() {
    let text = Arc::new(MockProvider::scripted(
        "text",
        vec![
            MockResponse::Failure(ProviderError::RateLimited("slow down".to_string())),
            MockResponse::Failure(ProviderError::Unavailable("503".to_string())),
        ],
    ));
    let orch = orchestrator(
        &fast_config(),
        memory_store(),
        vec![text.clone() as Arc<dyn TextProvider>],
        vec![Arc::new(MockProvider::offline("image")) as Arc<dyn ImageProvider>],
    );

    let status = orch
        .generate(GenerationRequest::new("Bridge design", 3))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::Finalized);
    // Two failed outline attempts, the successful one, then three sections
    assert!(text.call_count() >= 6);
    assert_eq!(orch.breakers().state(Capability::Text, "text"), BreakerState::Closed);
}

#[tokio::test]
async fn throttled_text_provider_does_not_block_its_image_namesake() {
    let mut config = fast_config();
    config.retry.breaker_failure_threshold = 3;
    config.retry.breaker_cooldown_ms = 600_000;

    let throttled = Arc::new(MockProvider::always(
        "openai",
        MockResponse::Failure(ProviderError::RateLimited("429".to_string())),
    ));
    let images = Arc::new(MockProvider::offline("openai"));
    let orch = orchestrator(
        &config,
        memory_store(),
        vec![
            throttled.clone() as Arc<dyn TextProvider>,
            Arc::new(MockProvider::offline("backup")) as Arc<dyn TextProvider>,
        ],
        vec![images.clone() as Arc<dyn ImageProvider>],
    );

    let status = orch
        .generate(GenerationRequest::new("Tidal power", 4))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::Finalized);
    assert_eq!(orch.breakers().state(Capability::Text, "openai"), BreakerState::Open);
    assert_eq!(orch.breakers().state(Capability::Image, "openai"), BreakerState::Closed);

    assert_eq!(images.call_count(), 4);
    let (_, artifacts) = orch.get_artifacts(&status.run_id).unwrap();
    for artifact in &artifacts {
        let image = artifact.image.as_ref().unwrap();
        assert_eq!(image.provider, "openai");
        assert!(!image.placeholder);
    }
}
