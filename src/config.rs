//! Configuration System
//!
//! Layered configuration for the workflow engine. Sources in increasing
//! precedence: built-in defaults, the user file
//! (`$XDG_CONFIG_HOME/deckflow/config.toml`), the workspace files
//! (`config/config.toml`, `config/{DECKFLOW_ENV}.toml`) and `DECKFLOW_*`
//! environment variables with `__` between key segments.

use crate::cache::CacheConfig;
use crate::consistency::ConsistencyConfig;
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::retry::RetryConfig;
use crate::scheduler::SchedulerConfig;
use crate::workflow::WorkflowConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use crate::provider::{ProviderConfig, ProviderType, ProvidersConfig};

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeckflowConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub consistency: ConsistencyConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Ordered provider chains; empty chains fall back to offline mocks
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable store location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "deckflow")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".deckflow/store"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Provider(String, String),
    Section(&'static str, String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(name, msg) => write!(f, "Provider '{}': {}", name, msg),
            ValidationError::Section(section, msg) => write!(f, "[{}] {}", section, msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl DeckflowConfig {
    /// Provider chains to build, substituting offline mocks for empty chains
    pub fn effective_providers(&self) -> ProvidersConfig {
        let offline = ProvidersConfig::offline();
        ProvidersConfig {
            text: if self.providers.text.is_empty() {
                offline.text
            } else {
                self.providers.text.clone()
            },
            image: if self.providers.image.is_empty() {
                offline.image
            } else {
                self.providers.image.clone()
            },
        }
    }

    /// Validate the entire configuration, reporting every problem found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut section = |name: &'static str, ok: bool, msg: &str| {
            if !ok {
                errors.push(ValidationError::Section(name, msg.to_string()));
            }
        };

        section("cache", self.cache.memory_capacity > 0, "memory_capacity must be at least 1");
        section("cache", self.cache.default_ttl_secs > 0, "default_ttl_secs must be positive");

        let retry = &self.retry;
        section("retry", retry.max_attempts >= 1, "max_attempts must be at least 1");
        section(
            "retry",
            retry.backoff_factor.is_finite() && retry.backoff_factor >= 1.0,
            "backoff_factor must be a finite number >= 1.0",
        );
        section(
            "retry",
            retry.base_delay_ms <= retry.max_delay_ms,
            "base_delay_ms must not exceed max_delay_ms",
        );
        section(
            "retry",
            retry.attempt_timeout_ms != Some(0),
            "attempt_timeout_ms must be positive when set",
        );
        section(
            "retry",
            retry.breaker_failure_threshold >= 1,
            "breaker_failure_threshold must be at least 1",
        );

        let scheduler = &self.scheduler;
        section("scheduler", scheduler.max_parallelism >= 1, "max_parallelism must be at least 1");
        section("scheduler", scheduler.task_timeout_ms > 0, "task_timeout_ms must be positive");
        section(
            "scheduler",
            scheduler.rate_limit_per_sec.is_finite() && scheduler.rate_limit_per_sec >= 0.0,
            "rate_limit_per_sec must be a finite number >= 0",
        );
        section(
            "scheduler",
            scheduler.rate_limit_per_sec == 0.0 || scheduler.rate_limit_burst >= 1,
            "rate_limit_burst must be at least 1 when rate limiting is enabled",
        );

        section(
            "consistency",
            (0.0..=1.0).contains(&self.consistency.max_placeholder_ratio),
            "max_placeholder_ratio must be within 0.0..=1.0",
        );
        section(
            "consistency",
            self.consistency.tone_outlier_threshold > 0.0,
            "tone_outlier_threshold must be positive",
        );

        let workflow = &self.workflow;
        section("workflow", workflow.min_sections >= 1, "min_sections must be at least 1");
        section(
            "workflow",
            workflow.min_sections <= workflow.max_sections,
            "min_sections must not exceed max_sections",
        );
        section("workflow", workflow.max_topic_chars > 0, "max_topic_chars must be positive");

        section(
            "storage",
            !self.storage.path.as_os_str().is_empty(),
            "path cannot be empty",
        );

        for (chain, configs) in [("text", &self.providers.text), ("image", &self.providers.image)] {
            let mut names = HashSet::new();
            for provider in configs {
                if let Err(e) = provider.validate() {
                    errors.push(ValidationError::Provider(provider.name.clone(), e));
                }
                if !names.insert(provider.name.as_str()) {
                    errors.push(ValidationError::Provider(
                        provider.name.clone(),
                        format!("Duplicate provider name in the {} chain", chain),
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validation failures folded into one error
    pub fn validated(self) -> Result<Self, ApiError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ApiError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}

/// Loads `DeckflowConfig` from its layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, user file, workspace files, then environment
    pub fn load(workspace_root: &Path) -> Result<DeckflowConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder
            .add_source(merge::merge_policy::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// One explicit file, still subject to environment overrides
    pub fn load_from_file(path: &Path) -> Result<DeckflowConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path))
            .add_source(merge::merge_policy::environment())
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Built-in defaults only
    pub fn default() -> DeckflowConfig {
        DeckflowConfig::default()
    }
}
