//! Task Scheduler
//!
//! Runs section tasks on a bounded pool. Each task is wrapped in a timeout and its
//! outcome recorded independently, so one failure never aborts its siblings.
//! Cancellation stops tasks that have not started; in-flight tasks finish or time out.

pub mod rate_limit;
pub mod task;

pub use rate_limit::TokenBucket;
pub use task::{
    ResultSet, RunClassification, SlideTask, TaskFailure, TaskKind, TaskOutcome, TaskOutput,
    TaskPayload, TaskStatus,
};

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const CANCELLED_REASON: &str = "cancelled";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Provider calls per second across the whole process; 0 disables limiting
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: f64,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_max_parallelism() -> usize {
    4
}

fn default_task_timeout_ms() -> u64 {
    180_000
}

fn default_rate_limit_per_sec() -> f64 {
    5.0
}

fn default_rate_limit_burst() -> u32 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_max_parallelism(),
            task_timeout_ms: default_task_timeout_ms(),
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
        }
    }
}

impl SchedulerConfig {
    pub fn token_bucket(&self) -> TokenBucket {
        TokenBucket::new(self.rate_limit_per_sec, self.rate_limit_burst)
    }
}

/// Executes one task and returns its output; never writes artifacts itself
#[async_trait]
pub trait TaskRunner: Send + Sync + 'static {
    async fn run(&self, task: &SlideTask) -> Result<TaskOutput, ApiError>;
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    max_parallelism: usize,
    task_timeout: Duration,
}

impl Scheduler {
    pub fn new(max_parallelism: usize, task_timeout: Duration) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
            task_timeout,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(
            config.max_parallelism,
            Duration::from_millis(config.task_timeout_ms),
        )
    }

    pub async fn schedule<R: TaskRunner + ?Sized>(
        &self,
        tasks: Vec<SlideTask>,
        runner: Arc<R>,
        cancel: &CancellationToken,
    ) -> ResultSet {
        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut join_set = JoinSet::new();
        let mut in_flight: HashMap<String, SlideTask> = HashMap::new();
        let mut results = ResultSet::default();

        for mut task in tasks {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                debug!(task_id = %task.task_id, "Task not started, run cancelled");
                results.record(task, Err(CANCELLED_REASON.to_string()));
                continue;
            };

            task.status = TaskStatus::Running;
            in_flight.insert(task.task_id.clone(), task.clone());
            let runner = Arc::clone(&runner);
            let timeout = self.task_timeout;
            join_set.spawn(async move {
                let _permit = permit;
                debug!(task_id = %task.task_id, kind = %task.kind, "Task started");
                let result = match tokio::time::timeout(timeout, runner.run(&task)).await {
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                };
                (task, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((task, result)) => {
                    in_flight.remove(&task.task_id);
                    if let Err(reason) = &result {
                        warn!(task_id = %task.task_id, reason = %reason, "Task failed");
                    }
                    results.record(task, result);
                }
                Err(err) => warn!(error = %err, "Task aborted"),
            }
        }
        // Anything still tracked panicked or was aborted before reporting
        for (_, task) in in_flight {
            results.record(task, Err("task aborted".to_string()));
        }

        results.sort();
        results
    }
}
