//! Per-section generation tasks and their outcomes.

use crate::artifact::{ImageContent, TextContent};
use crate::types::{Fingerprint, SectionIndex};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    Content,
    Image,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Content => "content",
            TaskKind::Image => "image",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One unit of work: produce the content or the image of one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideTask {
    pub task_id: String,
    pub section_index: SectionIndex,
    pub kind: TaskKind,
    pub fingerprint: Fingerprint,
    pub status: TaskStatus,
    pub retry_count: u32,
    /// Skip the cache read; set for consistency and targeted regenerations
    #[serde(default)]
    pub bypass_cache: bool,
}

impl SlideTask {
    pub fn new(
        run_id: &str,
        section_index: SectionIndex,
        kind: TaskKind,
        fingerprint: Fingerprint,
    ) -> Self {
        Self {
            task_id: format!("{}:{}:{}", run_id, section_index, kind),
            section_index,
            kind,
            fingerprint,
            status: TaskStatus::Pending,
            retry_count: 0,
            bypass_cache: false,
        }
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Generated content for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskPayload {
    Content(TextContent),
    Image(ImageContent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub payload: TaskPayload,
    /// Provider calls made; zero when served from cache
    pub attempts: u32,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub section_index: SectionIndex,
    pub kind: TaskKind,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task: SlideTask,
    pub result: Result<TaskOutput, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunClassification {
    Complete,
    Degraded,
    AllFailed,
}

/// Every task's terminal outcome, ordered by section then kind
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub outcomes: Vec<TaskOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<TaskFailure>,
}

impl ResultSet {
    pub(crate) fn record(&mut self, mut task: SlideTask, result: Result<TaskOutput, String>) {
        match &result {
            Ok(output) => {
                task.status = TaskStatus::Succeeded;
                task.retry_count = output.attempts.saturating_sub(1);
                self.succeeded += 1;
            }
            Err(reason) => {
                task.status = TaskStatus::Failed;
                self.failed += 1;
                self.failures.push(TaskFailure {
                    task_id: task.task_id.clone(),
                    section_index: task.section_index,
                    kind: task.kind,
                    reason: reason.clone(),
                });
            }
        }
        self.outcomes.push(TaskOutcome { task, result });
    }

    pub(crate) fn sort(&mut self) {
        self.outcomes
            .sort_by_key(|o| (o.task.section_index, o.task.kind));
        self.failures.sort_by_key(|f| (f.section_index, f.kind));
    }

    pub fn classify(&self) -> RunClassification {
        if self.failed == 0 {
            RunClassification::Complete
        } else if self.succeeded == 0 {
            RunClassification::AllFailed
        } else {
            RunClassification::Degraded
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
