//! User config file: $XDG_CONFIG_HOME/deckflow/config.toml or ~/.config/deckflow/config.toml

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::PathBuf;
use tracing::debug;

/// Path to the user-level config file
pub fn global_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("deckflow").join("config.toml"))
}

/// Add the user config file to the builder if it exists
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match global_config_path() {
        Some(path) if path.exists() => {
            debug!(config_path = %path.display(), "Loading user configuration");
            Ok(builder.add_source(File::from(path).required(false)))
        }
        _ => Ok(builder),
    }
}
