//! Workflow
//!
//! A run moves a `GenerationRequest` through outline generation, per-section
//! tasks, consistency review and delivery. The orchestrator owns run state; the
//! runner performs generation; the updater regenerates single sections.

pub mod orchestrator;
pub mod request;
pub mod runner;
pub mod state;
pub mod updater;

pub use orchestrator::{Orchestrator, RunStatus};
pub use request::{GenerationRequest, RequestBounds, StyleParams};
pub use runner::{GenerationServices, SectionTaskRunner};
pub use state::{FailureReason, RunState};
pub use updater::{SectionUpdate, UpdateTarget};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_min_sections")]
    pub min_sections: usize,
    #[serde(default = "default_max_sections")]
    pub max_sections: usize,
    #[serde(default = "default_max_topic_chars")]
    pub max_topic_chars: usize,
    /// Targeted re-schedules allowed after a review asks for regeneration
    #[serde(default = "default_max_consistency_rounds")]
    pub max_consistency_rounds: u32,
}

fn default_min_sections() -> usize {
    3
}

fn default_max_sections() -> usize {
    50
}

fn default_max_topic_chars() -> usize {
    500
}

fn default_max_consistency_rounds() -> u32 {
    2
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            min_sections: default_min_sections(),
            max_sections: default_max_sections(),
            max_topic_chars: default_max_topic_chars(),
            max_consistency_rounds: default_max_consistency_rounds(),
        }
    }
}

impl WorkflowConfig {
    pub fn bounds(&self) -> RequestBounds {
        RequestBounds {
            min_sections: self.min_sections,
            max_sections: self.max_sections,
            max_topic_chars: self.max_topic_chars,
        }
    }
}
