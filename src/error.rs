//! Error types for the deck generation workflow engine.

use crate::types::SectionIndex;
use thiserror::Error;

/// Durable storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode or decode record: {0}")]
    Codec(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure reported by a single call to a generative provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Provider rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Provider rejected input: {0}")]
    InvalidInput(String),

    #[error("Provider authentication failed: {0}")]
    AuthFailed(String),

    #[error("Provider returned a malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Rejected input and bad credentials fail the same way on every retry.
    /// A malformed response is a sampling accident and is retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited(_)
                | ProviderError::Unavailable(_)
                | ProviderError::MalformedResponse(_)
        )
    }
}

/// One failed attempt recorded by the fallback executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub provider: String,
    pub attempt: u32,
    pub error: String,
}

/// Errors surfaced by the retry/fallback executor once local recovery is exhausted
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("All providers exhausted for {operation} after {} failed attempts", .failures.len())]
    AllProvidersExhausted {
        operation: String,
        failures: Vec<AttemptFailure>,
    },

    #[error("Provider {provider} failed permanently during {operation}: {source}")]
    Permanent {
        operation: String,
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("No providers configured for {0}")]
    NoProviders(String),
}

/// Crate-level errors returned by the orchestrator and its components
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("ETag conflict on section {section_index}: expected {expected}, current {current}")]
    Conflict {
        section_index: SectionIndex,
        expected: String,
        current: String,
    },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Section {section_index} not found in run {run_id}")]
    SectionNotFound {
        run_id: String,
        section_index: SectionIndex,
    },

    #[error("Artifacts for run {run_id} are not available in state {state}")]
    ArtifactsNotReady { run_id: String, state: String },

    #[error("Illegal run state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Checkpoint write failed: {0}")]
    CheckpointFailed(String),

    #[error("Run cancelled: {0}")]
    Cancelled(String),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
