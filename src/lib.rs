//! Deckflow: cached, resumable deck generation
//!
//! Turns a topic into a multi-section deck (an outline, then a text body and an
//! image per section) by fanning work out over rate-limited generative providers.
//! Intermediate artifacts are cached by content fingerprint, runs are checkpointed
//! after every state change, and single sections can be regenerated under ETag
//! concurrency control.

pub mod artifact;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod consistency;
pub mod error;
pub mod logging;
pub mod prompt;
pub mod provider;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod workflow;

pub use error::ApiError;
pub use workflow::{GenerationRequest, Orchestrator, RunState, RunStatus, SectionUpdate};
