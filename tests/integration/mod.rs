//! Integration tests for deckflow generation runs

mod checkpoint_resume;
mod config_integration;
mod provider_fallback;
mod section_updates;
mod test_utils;
mod workflow_runs;

pub use test_utils::*;
