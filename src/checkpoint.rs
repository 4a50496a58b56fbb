//! Append-only run checkpoints.
//!
//! Every state change of a run is written as a new, sequence-numbered snapshot
//! under `checkpoint:{run_id}:{seq:020}`. Snapshots are never patched; the latest
//! one is the run's state of record.

use crate::artifact::{Outline, SectionArtifact};
use crate::consistency::ConsistencyReport;
use crate::error::StorageError;
use crate::scheduler::{SlideTask, TaskFailure, TaskPayload};
use crate::store::DurableStore;
use crate::types::{now_millis, RunId};
use crate::workflow::request::GenerationRequest;
use crate::workflow::state::RunState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const CHECKPOINT_KEY_PREFIX: &str = "checkpoint:";
const SEQ_KEY_PAD: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: RunId,
    pub seq: u64,
    pub state: RunState,
    pub request: GenerationRequest,
    pub outline: Option<Outline>,
    pub tasks: Vec<SlideTask>,
    pub artifacts: Vec<SectionArtifact>,
    pub failures: Vec<TaskFailure>,
    pub consistency: Option<ConsistencyReport>,
    pub consistency_rounds: u32,
    /// Outputs of succeeded tasks keyed by task id, kept so resume can skip them
    #[serde(default)]
    pub outputs: BTreeMap<String, TaskPayload>,
    /// Cause of the most recent fatal failure
    #[serde(default)]
    pub last_error: Option<String>,
    pub written_at_ms: u64,
}

impl Checkpoint {
    /// Initial snapshot of a freshly submitted run
    pub fn created(run_id: RunId, request: GenerationRequest) -> Self {
        Self {
            run_id,
            seq: 0,
            state: RunState::Created,
            request,
            outline: None,
            tasks: Vec::new(),
            artifacts: Vec::new(),
            failures: Vec::new(),
            consistency: None,
            consistency_rounds: 0,
            outputs: BTreeMap::new(),
            last_error: None,
            written_at_ms: now_millis(),
        }
    }

    pub fn artifact(&self, section_index: usize) -> Option<&SectionArtifact> {
        self.artifacts
            .iter()
            .find(|a| a.section_index == section_index)
    }
}

/// Latest checkpoint summary for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub seq: u64,
    pub state: RunState,
    pub topic: String,
    pub written_at_ms: u64,
}

#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn DurableStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    pub fn key_for(run_id: &RunId, seq: u64) -> String {
        format!(
            "{}{}:{:0width$}",
            CHECKPOINT_KEY_PREFIX,
            run_id,
            seq,
            width = SEQ_KEY_PAD
        )
    }

    /// Write a new snapshot. An existing sequence number is never overwritten.
    pub fn append(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let key = Self::key_for(&checkpoint.run_id, checkpoint.seq);
        if self.store.load(&key)?.is_some() {
            return Err(StorageError::Backend(format!(
                "checkpoint {} already written",
                key
            )));
        }
        let value = serde_json::to_vec(checkpoint).map_err(to_storage_data)?;
        self.store.save(&key, &value)?;
        self.store.flush()
    }

    pub fn latest(&self, run_id: &RunId) -> Result<Option<Checkpoint>, StorageError> {
        let entries = self.run_entries(run_id)?;
        match entries.last() {
            Some((_, raw)) => Ok(Some(decode(raw)?)),
            None => Ok(None),
        }
    }

    /// Every snapshot of a run, oldest first
    pub fn history(&self, run_id: &RunId) -> Result<Vec<Checkpoint>, StorageError> {
        self.run_entries(run_id)?
            .iter()
            .map(|(_, raw)| decode(raw))
            .collect()
    }

    /// Runs known to the store with their latest snapshot, most recent first
    pub fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError> {
        let mut latest: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        // Keys sort by sequence within a run, so the last value seen wins
        for (key, raw) in self.store.scan_prefix(CHECKPOINT_KEY_PREFIX)? {
            if let Some((run_id, _)) = parse_key(&key) {
                latest.insert(run_id.to_string(), raw);
            }
        }
        let mut runs = Vec::with_capacity(latest.len());
        for raw in latest.values() {
            let checkpoint = decode(raw)?;
            runs.push(RunSummary {
                run_id: checkpoint.run_id,
                seq: checkpoint.seq,
                state: checkpoint.state,
                topic: checkpoint.request.topic,
                written_at_ms: checkpoint.written_at_ms,
            });
        }
        runs.sort_by_key(|r| std::cmp::Reverse(r.written_at_ms));
        Ok(runs)
    }

    fn run_entries(&self, run_id: &RunId) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let prefix = format!("{}{}:", CHECKPOINT_KEY_PREFIX, run_id);
        Ok(self
            .store
            .scan_prefix(&prefix)?
            .into_iter()
            .filter(|(key, _)| parse_key(key).is_some_and(|(id, _)| id == run_id.as_str()))
            .collect())
    }
}

fn parse_key(key: &str) -> Option<(&str, u64)> {
    let rest = key.strip_prefix(CHECKPOINT_KEY_PREFIX)?;
    let (run_id, seq) = rest.rsplit_once(':')?;
    if seq.len() != SEQ_KEY_PAD {
        return None;
    }
    Some((run_id, seq.parse().ok()?))
}

fn decode(raw: &[u8]) -> Result<Checkpoint, StorageError> {
    serde_json::from_slice(raw).map_err(to_storage_data)
}

fn to_storage_data(err: serde_json::Error) -> StorageError {
    StorageError::Codec(format!("checkpoint codec error: {}", err))
}
