//! Logging System
//!
//! Structured logging through `tracing`. Level, format and destination come from
//! `LoggingConfig`, with environment overrides taking precedence:
//!
//! - `DECKFLOW_LOG`: full filter directive (replaces level and modules)
//! - `DECKFLOW_LOG_MODULES`: extra `module=level` pairs, comma separated
//! - `DECKFLOW_LOG_FORMAT`: `text` or `json`
//! - `DECKFLOW_LOG_OUTPUT`: `stdout`, `stderr` or `file`

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

/// Log destination; stdout is left to command output by default
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    #[default]
    Stderr,
    File,
}

impl FromStr for LogOutput {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, used when `output = "file"`
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Colored output (text format on a terminal stream only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module levels, e.g. `deckflow::retry = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(".deckflow/deckflow.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file: default_log_file(),
            color: default_true(),
            modules: BTreeMap::new(),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ApiError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = match std::env::var("DECKFLOW_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => config.format,
    };
    let output = match std::env::var("DECKFLOW_LOG_OUTPUT") {
        Ok(value) => value.parse()?,
        Err(_) => config.output,
    };

    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => BoxMakeWriter::new(Mutex::new(open_log_file(config)?)),
    };
    let ansi = config.color && output != LogOutput::File;

    let registry = Registry::default().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| ApiError::ConfigError(format!("Failed to install logger: {}", e)))
}

fn open_log_file(config: &LoggingConfig) -> Result<std::fs::File, ApiError> {
    if let Some(parent) = config.file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ApiError::ConfigError(format!("Failed to create log directory: {}", e))
        })?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .map_err(|e| {
            ApiError::ConfigError(format!(
                "Failed to open log file {}: {}",
                config.file.display(),
                e
            ))
        })
}

/// `DECKFLOW_LOG` wins outright; otherwise the configured level plus module
/// directives from config and `DECKFLOW_LOG_MODULES`.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ApiError> {
    if let Ok(filter) = EnvFilter::try_from_env("DECKFLOW_LOG") {
        return Ok(filter);
    }
    if config.level.trim() == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut directives: Vec<String> = config
        .modules
        .iter()
        .map(|(module, level)| format!("{}={}", module, level))
        .collect();
    if let Ok(modules) = std::env::var("DECKFLOW_LOG_MODULES") {
        directives.extend(parse_module_directives(&modules));
    }

    let mut filter = EnvFilter::new(config.level.trim());
    for directive in directives {
        let parsed = directive.parse().map_err(|e| {
            ApiError::ConfigError(format!("Invalid log directive {}: {}", directive, e))
        })?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

fn parse_module_directives(spec: &str) -> Vec<String> {
    spec.split(',')
        .filter_map(|pair| {
            let (module, level) = pair.split_once('=')?;
            let (module, level) = (module.trim(), level.trim());
            (!module.is_empty() && !level.is_empty()).then(|| format!("{}={}", module, level))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.color);
    }

    #[test]
    fn parses_formats_and_outputs() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" file ".parse::<LogOutput>().unwrap(), LogOutput::File);
        assert!("xml".parse::<LogFormat>().is_err());
        assert!("both".parse::<LogOutput>().is_err());
    }

    #[test]
    fn module_directives_skip_malformed_pairs() {
        let directives =
            parse_module_directives("deckflow::retry=debug, broken ,sled = warn,=info");
        assert_eq!(directives, vec!["deckflow::retry=debug", "sled=warn"]);
    }

    #[test]
    fn config_from_toml() {
        let config: LoggingConfig = toml::from_str(
            r#"
level = "debug"
format = "json"
output = "file"
file = "/tmp/deckflow.log"

[modules]
"deckflow::scheduler" = "trace"
"#,
        )
        .unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(config.modules.get("deckflow::scheduler").unwrap(), "trace");
        assert!(config.color);
    }
}
