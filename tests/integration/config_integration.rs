//! Integration tests for the layered configuration system

use deckflow::config::{ConfigLoader, DeckflowConfig, ValidationError};
use deckflow::provider::ProviderType;
use deckflow::store::MemoryStore;
use deckflow::workflow::{GenerationRequest, RunState};
use deckflow::Orchestrator;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use crate::integration::with_xdg_env;

#[test]
fn test_config_file_declares_provider_chains() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("deckflow.toml");

    fs::write(
        &config_file,
        r#"
[scheduler]
max_parallelism = 2
rate_limit_per_sec = 5.0
rate_limit_burst = 2

[[providers.text]]
name = "primary"
provider_type = "openai"
model = "gpt-4o-mini"
endpoint = "https://api.openai.com/v1"
api_key_env = "DECKFLOW_TEST_KEY"

[[providers.text]]
name = "offline"
provider_type = "mock"

[[providers.image]]
name = "sketches"
provider_type = "mock"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.scheduler.max_parallelism, 2);
    assert_eq!(config.providers.text.len(), 2);
    assert_eq!(config.providers.text[0].provider_type, ProviderType::OpenAi);
    assert_eq!(config.providers.text[1].provider_type, ProviderType::Mock);

    let effective = config.effective_providers();
    assert_eq!(effective.text[0].name, "primary");
    assert_eq!(effective.image[0].name, "sketches");
    // Unset sections keep their defaults
    assert_eq!(config.retry, DeckflowConfig::default().retry);
}

#[test]
fn test_validation_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("broken.toml");

    fs::write(
        &config_file,
        r#"
[retry]
max_attempts = 0
backoff_factor = 0.5

[workflow]
min_sections = 10
max_sections = 5

[[providers.image]]
name = "dup"
provider_type = "mock"

[[providers.image]]
name = "dup"
provider_type = "mock"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 4);
    assert!(errors.contains(&ValidationError::Section(
        "retry",
        "max_attempts must be at least 1".to_string()
    )));
    assert!(errors
        .iter()
        .any(|e| matches!(e, ValidationError::Provider(name, _) if name == "dup")));
    assert!(config.validated().is_err());
}

#[test]
fn test_missing_config_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = ConfigLoader::load_from_file(&temp_dir.path().join("absent.toml"));
    assert!(result.is_err());
}

#[test]
fn test_layers_apply_in_precedence_order() {
    let test_dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();

    with_xdg_env(&test_dir, || {
        let user_dir = test_dir.path().join("deckflow");
        fs::create_dir_all(&user_dir).unwrap();
        fs::write(
            user_dir.join("config.toml"),
            "[scheduler]\nmax_parallelism = 2\n\n[cache]\nmemory_capacity = 10\n",
        )
        .unwrap();

        let config_dir = workspace.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("config.toml"),
            "[scheduler]\nmax_parallelism = 3\n",
        )
        .unwrap();
        fs::write(
            config_dir.join("staging.toml"),
            "[retry]\nbase_delay_ms = 50\n",
        )
        .unwrap();

        std::env::set_var("DECKFLOW_ENV", "staging");
        std::env::set_var("DECKFLOW_RETRY__MAX_ATTEMPTS", "5");

        let config = ConfigLoader::load(workspace.path()).unwrap();
        assert_eq!(config.cache.memory_capacity, 10);
        assert_eq!(config.scheduler.max_parallelism, 3);
        assert_eq!(config.retry.base_delay_ms, 50);
        assert_eq!(config.retry.max_attempts, 5);
    });
}

#[test]
fn test_default_store_lives_under_data_home() {
    let test_dir = TempDir::new().unwrap();

    with_xdg_env(&test_dir, || {
        let config = ConfigLoader::load(test_dir.path()).unwrap();
        assert!(config.storage.path.starts_with(test_dir.path().join("data")));
        assert!(config.storage.path.ends_with("store"));
    });
}

#[tokio::test]
async fn test_empty_provider_chains_run_offline() {
    let config = ConfigLoader::default();
    let orch = Orchestrator::from_config(&config, Arc::new(MemoryStore::new())).unwrap();

    let status = orch
        .generate(GenerationRequest::new("Offline demo", 3))
        .await
        .unwrap();
    assert_eq!(status.state, RunState::Finalized);
}
