//! Shared test utilities for integration tests
//!
//! Provides orchestrator fixtures over mock providers and isolated XDG
//! directories for configuration tests.

use deckflow::config::DeckflowConfig;
use deckflow::error::ProviderError;
use deckflow::provider::{
    GenerationParams, ImageProvider, MockProvider, Provider, TextProvider,
};
use deckflow::store::{DurableStore, MemoryStore};
use deckflow::Orchestrator;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Global mutex to serialize environment variable access across all tests
static XDG_ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Environment variable state to restore after test
struct EnvState {
    vars: Vec<(&'static str, Option<String>)>,
}

const ISOLATED_VARS: &[&str] = &[
    "HOME",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "DECKFLOW_ENV",
    "DECKFLOW_SCHEDULER__MAX_PARALLELISM",
    "DECKFLOW_RETRY__MAX_ATTEMPTS",
];

impl EnvState {
    fn capture() -> Self {
        Self {
            vars: ISOLATED_VARS
                .iter()
                .map(|name| (*name, std::env::var(name).ok()))
                .collect(),
        }
    }

    fn restore(self) {
        for (name, value) in self.vars {
            match value {
                Some(orig) => std::env::set_var(name, orig),
                None => std::env::remove_var(name),
            }
        }
    }
}

/// Set up isolated XDG directories for a test with automatic cleanup
///
/// XDG_CONFIG_HOME points at `test_dir`, XDG_DATA_HOME at `test_dir/data` and
/// HOME at `test_dir/home`. Deckflow environment overrides set inside `f` are
/// removed afterwards.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let env_state = EnvState::capture();

    let test_data_home = test_dir.path().join("data");
    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_data_home).unwrap();
    std::fs::create_dir_all(&test_home).unwrap();

    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path().to_str().unwrap());
    std::env::set_var("XDG_DATA_HOME", test_data_home.to_str().unwrap());
    for name in &ISOLATED_VARS[3..] {
        std::env::remove_var(name);
    }

    let result = f();

    env_state.restore();

    result
}

/// Defaults with near-zero backoff and no rate limit
pub fn fast_config() -> DeckflowConfig {
    let mut config = DeckflowConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    config.scheduler.rate_limit_per_sec = 0.0;
    config
}

pub fn memory_store() -> Arc<dyn DurableStore> {
    Arc::new(MemoryStore::new())
}

/// Orchestrator over explicit provider chains
pub fn orchestrator(
    config: &DeckflowConfig,
    store: Arc<dyn DurableStore>,
    text: Vec<Arc<dyn TextProvider>>,
    image: Vec<Arc<dyn ImageProvider>>,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::with_providers(config, store, text, image))
}

/// Orchestrator over a single text and a single image provider
pub fn single_chain(
    config: &DeckflowConfig,
    store: Arc<dyn DurableStore>,
    text: Arc<MockProvider>,
    image: Arc<MockProvider>,
) -> Arc<Orchestrator> {
    orchestrator(
        config,
        store,
        vec![text as Arc<dyn TextProvider>],
        vec![image as Arc<dyn ImageProvider>],
    )
}

pub fn section_prompts(provider: &MockProvider) -> Vec<String> {
    provider
        .prompts()
        .into_iter()
        .filter(|p| p.starts_with("Write the body text"))
        .collect()
}

pub fn outline_prompts(provider: &MockProvider) -> Vec<String> {
    provider
        .prompts()
        .into_iter()
        .filter(|p| p.starts_with("Create an outline"))
        .collect()
}

/// Offline text provider that rejects section prompts for chosen titles until healed
pub struct SectionSaboteur {
    inner: MockProvider,
    failing_titles: Vec<String>,
    healed: AtomicBool,
}

impl SectionSaboteur {
    pub fn new(name: &str, failing_titles: Vec<String>) -> Self {
        Self {
            inner: MockProvider::offline(name),
            failing_titles,
            healed: AtomicBool::new(false),
        }
    }

    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MockProvider {
        &self.inner
    }

    fn rejects(&self, prompt: &str) -> bool {
        if self.healed.load(Ordering::SeqCst) {
            return false;
        }
        let title = deckflow::prompt::field(prompt, "Title");
        title.is_some_and(|t| self.failing_titles.iter().any(|f| f == t))
    }
}

impl Provider for SectionSaboteur {
    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl TextProvider for SectionSaboteur {
    async fn generate_text(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        if self.rejects(prompt) {
            return Err(ProviderError::InvalidInput(
                "section rejected by content filter".to_string(),
            ));
        }
        self.inner.generate_text(prompt, params).await
    }
}
