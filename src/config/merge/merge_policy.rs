//! Merge rules: defaults first, then files, then environment.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment};

/// Builder seeded with the settings every layer may override.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("workflow.max_consistency_rounds", 2)?
        .set_default("scheduler.max_parallelism", 4)?
        .set_default("retry.max_attempts", 3)
}

/// `DECKFLOW_RETRY__MAX_ATTEMPTS=5` sets `retry.max_attempts`. Single-underscore
/// variables such as `DECKFLOW_LOG` belong to logging and do not map to keys.
pub fn environment() -> Environment {
    Environment::with_prefix("DECKFLOW")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
