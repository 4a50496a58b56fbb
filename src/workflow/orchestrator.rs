//! Workflow Orchestrator
//!
//! Drives a run through its states. Each state change is written as a new
//! checkpoint before it becomes visible in memory, so the checkpoint store always
//! holds the state of record. Per-run state sits behind a mutex that is never held
//! across an await: generation happens unlocked and results are merged under the
//! lock, the same lock `update_section` uses for its compare-and-swap.

use crate::artifact::{ImageContent, Outline, SectionArtifact, TextContent};
use crate::cache::{CacheManager, CacheStats};
use crate::checkpoint::{Checkpoint, CheckpointStore, RunSummary};
use crate::config::DeckflowConfig;
use crate::consistency::{ConsistencyManager, ConsistencyReport};
use crate::error::ApiError;
use crate::provider::{ImageChain, PlaceholderImageGenerator, ProviderFactory, TextChain};
use crate::retry::{BreakerRegistry, FallbackExecutor};
use crate::scheduler::{
    ResultSet, Scheduler, SlideTask, TaskFailure, TaskKind, TaskPayload, TaskStatus,
};
use crate::store::DurableStore;
use crate::types::{now_millis, RunId, SectionIndex};
use crate::workflow::request::GenerationRequest;
use crate::workflow::runner::{build_tasks, generate_outline, GenerationServices, SectionTaskRunner};
use crate::workflow::state::{FailureReason, RunState};
use crate::workflow::WorkflowConfig;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Externally visible progress of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub request_id: String,
    pub topic: String,
    pub state: RunState,
    pub completed_sections: usize,
    pub total_sections: usize,
    pub failures: Vec<TaskFailure>,
    pub consistency: Option<ConsistencyReport>,
    pub consistency_rounds: u32,
    pub checkpoint_seq: u64,
    /// Some sections are missing or carry placeholder content
    pub degraded: bool,
    pub last_error: Option<String>,
}

impl RunStatus {
    pub fn from_checkpoint(record: &Checkpoint) -> Self {
        let total_sections = record
            .outline
            .as_ref()
            .map(Outline::len)
            .unwrap_or(record.request.section_count);
        let missing = record.state.artifacts_available() && record.artifacts.len() < total_sections;
        let degraded = missing
            || record.state == RunState::PartiallyComplete
            || record.artifacts.iter().any(SectionArtifact::has_placeholder);
        Self {
            run_id: record.run_id.clone(),
            request_id: record.request.request_id.clone(),
            topic: record.request.topic.clone(),
            state: record.state,
            completed_sections: record.artifacts.len(),
            total_sections,
            failures: record.failures.clone(),
            consistency: record.consistency.clone(),
            consistency_rounds: record.consistency_rounds,
            checkpoint_seq: record.seq,
            degraded,
            last_error: record.last_error.clone(),
        }
    }
}

/// In-memory handle on one run
pub(crate) struct RunSlot {
    pub(crate) record: Mutex<Checkpoint>,
    cancel: CancellationToken,
    driving: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl RunSlot {
    fn new(record: Checkpoint) -> Self {
        Self {
            record: Mutex::new(record),
            cancel: CancellationToken::new(),
            driving: AtomicBool::new(false),
            driver: Mutex::new(None),
        }
    }

    fn is_driving(&self) -> bool {
        self.driving.load(Ordering::SeqCst)
    }

    fn status(&self) -> RunStatus {
        RunStatus::from_checkpoint(&self.record.lock())
    }
}

/// Clears the driving flag when the drive loop exits, however it exits
struct DriveGuard<'a>(&'a AtomicBool);

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    pub(crate) services: Arc<GenerationServices>,
    pub(crate) scheduler: Scheduler,
    pub(crate) consistency: ConsistencyManager,
    checkpoints: CheckpointStore,
    config: WorkflowConfig,
    runs: RwLock<HashMap<RunId, Arc<RunSlot>>>,
}

impl Orchestrator {
    pub fn new(
        services: Arc<GenerationServices>,
        scheduler: Scheduler,
        consistency: ConsistencyManager,
        checkpoints: CheckpointStore,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            services,
            scheduler,
            consistency,
            checkpoints,
            config,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Wire every component from configuration, building the configured provider chains
    pub fn from_config(
        config: &DeckflowConfig,
        store: Arc<dyn DurableStore>,
    ) -> Result<Self, ApiError> {
        let providers = config.effective_providers();
        let text = ProviderFactory::text_chain(&providers.text)?;
        let image = ProviderFactory::image_chain(&providers.image)?;
        Ok(Self::with_providers(config, store, text, image))
    }

    /// Wire every component from configuration around explicit provider chains
    pub fn with_providers(
        config: &DeckflowConfig,
        store: Arc<dyn DurableStore>,
        text_providers: TextChain,
        image_providers: ImageChain,
    ) -> Self {
        let cache = Arc::new(CacheManager::new(Arc::clone(&store), &config.cache));
        let limiter = Arc::new(config.scheduler.token_bucket());
        let breakers = Arc::new(config.retry.breaker_registry());
        let executor = Arc::new(FallbackExecutor::new(&config.retry, breakers, Some(limiter)));
        let services = Arc::new(GenerationServices {
            cache,
            executor,
            text_providers,
            image_providers,
            placeholder: PlaceholderImageGenerator,
        });
        Self::new(
            services,
            Scheduler::from_config(&config.scheduler),
            ConsistencyManager::new(config.consistency.clone()),
            CheckpointStore::new(store),
            config.workflow.clone(),
        )
    }

    /// Validate, checkpoint and start driving a run in the background
    pub fn submit(self: &Arc<Self>, request: GenerationRequest) -> Result<RunId, ApiError> {
        let (run_id, slot) = self.create_run(request)?;
        let orchestrator = Arc::clone(self);
        let driven = Arc::clone(&slot);
        let id = run_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = orchestrator.drive(&driven).await {
                error!(run_id = %id, error = %err, "Run driver stopped");
            }
        });
        *slot.driver.lock() = Some(handle);
        Ok(run_id)
    }

    /// Validate, checkpoint and drive a run on the calling task
    pub async fn generate(&self, request: GenerationRequest) -> Result<RunStatus, ApiError> {
        let (_, slot) = self.create_run(request)?;
        self.drive(&slot).await
    }

    /// Wait for a background driver started by `submit`, then report status
    pub async fn wait(&self, run_id: &RunId) -> Result<RunStatus, ApiError> {
        let slot = self.load_slot(run_id)?;
        let handle = slot.driver.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| ApiError::GenerationFailed(format!("run driver aborted: {}", e)))?;
        }
        Ok(slot.status())
    }

    pub fn get_status(&self, run_id: &RunId) -> Result<RunStatus, ApiError> {
        Ok(RunStatus::from_checkpoint(&self.snapshot(run_id)?))
    }

    pub fn get_artifacts(
        &self,
        run_id: &RunId,
    ) -> Result<(Outline, Vec<SectionArtifact>), ApiError> {
        let record = self.snapshot(run_id)?;
        match (record.state.artifacts_available(), record.outline) {
            (true, Some(outline)) => Ok((outline, record.artifacts)),
            _ => Err(ApiError::ArtifactsNotReady {
                run_id: run_id.to_string(),
                state: record.state.to_string(),
            }),
        }
    }

    /// Re-enter a run from its latest checkpoint. Only tasks that have not
    /// succeeded are issued again; terminal runs are reported as they are.
    pub async fn resume(&self, run_id: &RunId) -> Result<RunStatus, ApiError> {
        if let Some(slot) = self.cached_slot(run_id) {
            if slot.is_driving() {
                return Ok(slot.status());
            }
        }
        let record = self
            .checkpoints
            .latest(run_id)?
            .ok_or_else(|| ApiError::RunNotFound(run_id.to_string()))?;
        if record.state.is_terminal() {
            return Ok(RunStatus::from_checkpoint(&record));
        }
        info!(
            run_id = %run_id,
            state = %record.state,
            seq = record.seq,
            "Resuming run"
        );

        let slot = Arc::new(RunSlot::new(record));
        self.runs.write().insert(run_id.clone(), Arc::clone(&slot));
        {
            let mut record = slot.record.lock();
            if record.state == RunState::PartiallyComplete {
                reissue_placeholder_images(&mut record);
                self.commit(&mut record, Some(RunState::SectionsScheduled))?;
            }
        }
        self.drive(&slot).await
    }

    /// Stop a run. A live driver observes the cancellation and fails the run
    /// itself; an idle run is failed here.
    pub fn cancel(&self, run_id: &RunId) -> Result<RunStatus, ApiError> {
        let slot = self.load_slot(run_id)?;
        slot.cancel.cancel();
        if slot.is_driving() {
            info!(run_id = %run_id, "Cancellation requested");
            return Ok(slot.status());
        }
        let mut record = slot.record.lock();
        self.fail(&mut record, FailureReason::UserCancelled, "cancelled by caller")?;
        Ok(RunStatus::from_checkpoint(&record))
    }

    /// Accept a degraded run as delivered
    pub fn finalize(&self, run_id: &RunId) -> Result<RunStatus, ApiError> {
        let slot = self.load_slot(run_id)?;
        let mut record = slot.record.lock();
        if record.state != RunState::PartiallyComplete || slot.is_driving() {
            return Err(ApiError::InvalidTransition {
                from: record.state.to_string(),
                to: RunState::Finalized.to_string(),
            });
        }
        // Updates may have changed sections since the run was last reviewed
        let outline = outline_of(&record)?;
        self.review_degraded(&mut record, &outline, RunState::Finalized)?;
        Ok(RunStatus::from_checkpoint(&record))
    }

    pub fn list_runs(&self) -> Result<Vec<RunSummary>, ApiError> {
        Ok(self.checkpoints.list_runs()?)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.services.cache.stats()
    }

    /// Sweep expired entries from the durable cache tier
    pub fn purge_cache(&self) -> usize {
        self.services.cache.purge_expired()
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.services.executor.breakers()
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    fn create_run(&self, request: GenerationRequest) -> Result<(RunId, Arc<RunSlot>), ApiError> {
        request.validate(&self.config.bounds())?;
        let run_id = RunId::new();
        let record = Checkpoint::created(run_id.clone(), request);
        self.checkpoints
            .append(&record)
            .map_err(|e| ApiError::CheckpointFailed(e.to_string()))?;
        info!(
            run_id = %run_id,
            request_id = %record.request.request_id,
            topic = %record.request.topic,
            sections = record.request.section_count,
            "Run submitted"
        );
        let slot = Arc::new(RunSlot::new(record));
        self.runs.write().insert(run_id.clone(), Arc::clone(&slot));
        Ok((run_id, slot))
    }

    fn cached_slot(&self, run_id: &RunId) -> Option<Arc<RunSlot>> {
        self.runs.read().get(run_id).cloned()
    }

    /// The in-memory slot for a run, loading it from its latest checkpoint if needed
    pub(crate) fn load_slot(&self, run_id: &RunId) -> Result<Arc<RunSlot>, ApiError> {
        if let Some(slot) = self.cached_slot(run_id) {
            return Ok(slot);
        }
        let record = self
            .checkpoints
            .latest(run_id)?
            .ok_or_else(|| ApiError::RunNotFound(run_id.to_string()))?;
        let mut runs = self.runs.write();
        let slot = runs
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(RunSlot::new(record)));
        Ok(Arc::clone(slot))
    }

    fn snapshot(&self, run_id: &RunId) -> Result<Checkpoint, ApiError> {
        match self.cached_slot(run_id) {
            Some(slot) => Ok(slot.record.lock().clone()),
            None => self
                .checkpoints
                .latest(run_id)?
                .ok_or_else(|| ApiError::RunNotFound(run_id.to_string())),
        }
    }

    /// Write `record` as the next checkpoint, moving to `next` if given. On a
    /// write failure the stored history is left as it was and the in-memory run
    /// becomes `Failed(CheckpointWriteFailed)`.
    pub(crate) fn commit(
        &self,
        record: &mut Checkpoint,
        next: Option<RunState>,
    ) -> Result<(), ApiError> {
        let mut snapshot = record.clone();
        if let Some(next) = next {
            snapshot.state = record.state.transition(next)?;
        }
        snapshot.seq = record.seq + 1;
        snapshot.written_at_ms = now_millis();

        if let Err(err) = self.checkpoints.append(&snapshot) {
            error!(
                run_id = %record.run_id,
                seq = snapshot.seq,
                error = %err,
                "Checkpoint write failed"
            );
            record.state = RunState::Failed(FailureReason::CheckpointWriteFailed);
            record.last_error = Some(err.to_string());
            return Err(ApiError::CheckpointFailed(err.to_string()));
        }

        if snapshot.state != record.state {
            info!(
                run_id = %record.run_id,
                from = %record.state,
                to = %snapshot.state,
                seq = snapshot.seq,
                "Run state changed"
            );
        }
        *record = snapshot;
        Ok(())
    }

    /// Replace `record` with `next` in the same state. A write failure leaves
    /// both the run and its stored history untouched.
    pub(crate) fn commit_update(
        &self,
        record: &mut Checkpoint,
        mut next: Checkpoint,
    ) -> Result<(), ApiError> {
        next.seq = record.seq + 1;
        next.written_at_ms = now_millis();
        self.checkpoints.append(&next).map_err(|err| {
            warn!(
                run_id = %record.run_id,
                seq = next.seq,
                error = %err,
                "Checkpoint write failed, update discarded"
            );
            ApiError::CheckpointFailed(err.to_string())
        })?;
        *record = next;
        Ok(())
    }

    fn fail(
        &self,
        record: &mut Checkpoint,
        reason: FailureReason,
        detail: impl Into<String>,
    ) -> Result<(), ApiError> {
        let detail = detail.into();
        error!(run_id = %record.run_id, reason = %reason, detail = %detail, "Run failed");
        record.last_error = Some(detail);
        self.commit(record, Some(RunState::Failed(reason)))
    }

    async fn drive(&self, slot: &RunSlot) -> Result<RunStatus, ApiError> {
        if slot.driving.swap(true, Ordering::SeqCst) {
            return Ok(slot.status());
        }
        let _guard = DriveGuard(&slot.driving);

        loop {
            let state = slot.record.lock().state;
            if state.is_terminal() || state == RunState::PartiallyComplete {
                break;
            }
            if slot.cancel.is_cancelled() {
                let mut record = slot.record.lock();
                self.fail(&mut record, FailureReason::UserCancelled, "cancelled by caller")?;
                break;
            }
            match state {
                RunState::Created => self.step_outline(slot).await?,
                RunState::OutlineReady => self.step_plan(slot)?,
                RunState::SectionsScheduled => self.step_sections(slot).await?,
                RunState::SectionsComplete => self.step_consistency(slot).await?,
                RunState::ConsistencyChecked => self.step_deliver(slot)?,
                RunState::PartiallyComplete | RunState::Finalized | RunState::Failed(_) => break,
            }
        }
        Ok(slot.status())
    }

    async fn step_outline(&self, slot: &RunSlot) -> Result<(), ApiError> {
        let request = slot.record.lock().request.clone();
        // A provider call in flight is never interrupted; cancellation is observed once it returns
        let outcome = generate_outline(&self.services, &request).await;

        let mut record = slot.record.lock();
        if slot.cancel.is_cancelled() {
            return self.fail(
                &mut record,
                FailureReason::UserCancelled,
                "cancelled while generating the outline",
            );
        }
        match outcome {
            Ok(outline) => {
                debug!(run_id = %record.run_id, sections = outline.len(), "Outline ready");
                record.outline = Some(outline);
                self.commit(&mut record, Some(RunState::OutlineReady))
            }
            Err(err) => self.fail(&mut record, FailureReason::OutlineExhausted, err.to_string()),
        }
    }

    fn step_plan(&self, slot: &RunSlot) -> Result<(), ApiError> {
        let mut record = slot.record.lock();
        let outline = outline_of(&record)?;
        record.tasks = build_tasks(&record.run_id, &record.request, &outline);
        self.commit(&mut record, Some(RunState::SectionsScheduled))
    }

    async fn step_sections(&self, slot: &RunSlot) -> Result<(), ApiError> {
        let (run_id, request, outline, pending) = {
            let record = slot.record.lock();
            let pending: Vec<SlideTask> = record
                .tasks
                .iter()
                .filter(|t| t.status != TaskStatus::Succeeded)
                .cloned()
                .map(|mut t| {
                    t.status = TaskStatus::Pending;
                    t
                })
                .collect();
            (
                record.run_id.clone(),
                record.request.clone(),
                outline_of(&record)?,
                pending,
            )
        };
        info!(run_id = %run_id, tasks = pending.len(), "Scheduling section tasks");

        let runner = Arc::new(SectionTaskRunner::new(
            Arc::clone(&self.services),
            run_id,
            request,
            outline.clone(),
        ));
        let results = self
            .scheduler
            .schedule(pending, Arc::clone(&runner), &slot.cancel)
            .await;

        let mut record = slot.record.lock();
        let touched = merge_results(&mut record, &results);
        if slot.cancel.is_cancelled() {
            return self.fail(
                &mut record,
                FailureReason::UserCancelled,
                "cancelled while sections were generating",
            );
        }
        assemble_artifacts(&mut record, &outline, &touched, &runner);
        record.failures = results.failures.clone();

        if record.artifacts.is_empty() {
            return self.fail(
                &mut record,
                FailureReason::AllSectionsFailed,
                format!("all {} sections failed", outline.len()),
            );
        }
        if record.artifacts.len() < outline.len() {
            warn!(
                run_id = %record.run_id,
                completed = record.artifacts.len(),
                total = outline.len(),
                "Run degraded, some sections failed"
            );
            return self.review_degraded(&mut record, &outline, RunState::PartiallyComplete);
        }
        self.commit(&mut record, Some(RunState::SectionsComplete))
    }

    /// Review a run with missing sections, then move it to `next` unless the
    /// review fails it
    fn review_degraded(
        &self,
        record: &mut Checkpoint,
        outline: &Outline,
        next: RunState,
    ) -> Result<(), ApiError> {
        let excused = failed_sections(record);
        let report = self
            .consistency
            .review_partial(outline, &record.artifacts, &excused);
        let rejected = report.requires_failure();
        let detail = violation_detail(&report);
        record.consistency = Some(report);
        if rejected {
            return self.fail(record, FailureReason::ConsistencyFailed, detail);
        }
        self.commit(record, Some(next))
    }

    async fn step_consistency(&self, slot: &RunSlot) -> Result<(), ApiError> {
        let (run_id, request, outline, artifacts, rounds) = {
            let record = slot.record.lock();
            (
                record.run_id.clone(),
                record.request.clone(),
                outline_of(&record)?,
                record.artifacts.clone(),
                record.consistency_rounds,
            )
        };
        let report = self.consistency.review(&outline, &artifacts);

        if report.requires_failure() {
            let detail = violation_detail(&report);
            let mut record = slot.record.lock();
            record.consistency = Some(report);
            return self.fail(&mut record, FailureReason::ConsistencyFailed, detail);
        }

        let targets = report.sections_to_regenerate();
        if targets.is_empty() || rounds >= self.config.max_consistency_rounds {
            if !targets.is_empty() {
                warn!(
                    run_id = %run_id,
                    sections = targets.len(),
                    "Consistency rounds exhausted, accepting remaining violations"
                );
            }
            let mut record = slot.record.lock();
            record.consistency = Some(report);
            return self.commit(&mut record, Some(RunState::ConsistencyChecked));
        }

        info!(
            run_id = %run_id,
            round = rounds + 1,
            sections = targets.len(),
            "Regenerating inconsistent sections"
        );
        let (tasks, etags) = {
            let record = slot.record.lock();
            let tasks: Vec<SlideTask> = record
                .tasks
                .iter()
                .filter(|t| t.kind == TaskKind::Content && targets.contains(&t.section_index))
                .map(|t| {
                    let mut task = t.clone().bypassing_cache();
                    task.status = TaskStatus::Pending;
                    task
                })
                .collect();
            let etags: BTreeMap<SectionIndex, String> = record
                .artifacts
                .iter()
                .filter(|a| targets.contains(&a.section_index))
                .map(|a| (a.section_index, a.etag.clone()))
                .collect();
            (tasks, etags)
        };

        let runner = Arc::new(SectionTaskRunner::new(
            Arc::clone(&self.services),
            run_id,
            request,
            outline,
        ));
        let results = self.scheduler.schedule(tasks, runner, &slot.cancel).await;

        let mut record = slot.record.lock();
        if slot.cancel.is_cancelled() {
            return self.fail(
                &mut record,
                FailureReason::UserCancelled,
                "cancelled during consistency review",
            );
        }
        for outcome in &results.outcomes {
            let Ok(output) = &outcome.result else {
                continue;
            };
            let TaskPayload::Content(text) = &output.payload else {
                continue;
            };
            let index = outcome.task.section_index;
            let Some(artifact) = record.artifacts.iter_mut().find(|a| a.section_index == index)
            else {
                continue;
            };
            if etags.get(&index) != Some(&artifact.etag) {
                // An update_section call replaced it while the round ran
                debug!(
                    run_id = %record.run_id,
                    section = index,
                    "Section changed during review, keeping it"
                );
                continue;
            }
            *artifact = artifact.next_version(
                artifact.title.clone(),
                Some(text.clone()),
                artifact.image.clone(),
            );
            record
                .outputs
                .insert(outcome.task.task_id.clone(), output.payload.clone());
        }
        record.consistency_rounds += 1;
        record.consistency = Some(report);
        self.commit(&mut record, None)
    }

    fn step_deliver(&self, slot: &RunSlot) -> Result<(), ApiError> {
        let mut record = slot.record.lock();
        let placeholders = record
            .artifacts
            .iter()
            .filter(|a| a.has_placeholder())
            .count();
        let next = if placeholders > 0 {
            warn!(
                run_id = %record.run_id,
                placeholders,
                "Run degraded, placeholder content remains"
            );
            RunState::PartiallyComplete
        } else {
            RunState::Finalized
        };
        self.commit(&mut record, Some(next))
    }
}

/// Sections whose content task failed; they have no artifact
fn failed_sections(record: &Checkpoint) -> BTreeSet<SectionIndex> {
    record
        .tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Content && t.status == TaskStatus::Failed)
        .map(|t| t.section_index)
        .collect()
}

fn violation_detail(report: &ConsistencyReport) -> String {
    report
        .violations
        .iter()
        .map(|v| v.detail.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn outline_of(record: &Checkpoint) -> Result<Outline, ApiError> {
    record.outline.clone().ok_or_else(|| {
        ApiError::GenerationFailed(format!(
            "run {} has no outline in state {}",
            record.run_id, record.state
        ))
    })
}

/// Fold a batch into the record's tasks and outputs. Returns the sections that
/// received new output.
fn merge_results(record: &mut Checkpoint, results: &ResultSet) -> BTreeSet<SectionIndex> {
    let mut touched = BTreeSet::new();
    for outcome in &results.outcomes {
        if let Some(task) = record
            .tasks
            .iter_mut()
            .find(|t| t.task_id == outcome.task.task_id)
        {
            *task = outcome.task.clone();
        }
        if let Ok(output) = &outcome.result {
            record
                .outputs
                .insert(outcome.task.task_id.clone(), output.payload.clone());
            touched.insert(outcome.task.section_index);
        }
    }
    touched
}

fn task_output<'a>(
    record: &'a Checkpoint,
    section_index: SectionIndex,
    kind: TaskKind,
) -> Option<&'a TaskPayload> {
    record
        .tasks
        .iter()
        .find(|t| t.section_index == section_index && t.kind == kind)
        .and_then(|t| record.outputs.get(&t.task_id))
}

/// Build or advance artifacts from the stored task outputs. Sections without
/// content output get no artifact; sections restored from a checkpoint without
/// an artifact are built from their stored outputs.
fn assemble_artifacts(
    record: &mut Checkpoint,
    outline: &Outline,
    touched: &BTreeSet<SectionIndex>,
    runner: &SectionTaskRunner,
) {
    for spec in &outline.sections {
        if !touched.contains(&spec.index) && record.artifact(spec.index).is_some() {
            continue;
        }
        let text: Option<TextContent> = match task_output(record, spec.index, TaskKind::Content) {
            Some(TaskPayload::Content(text)) => Some(text.clone()),
            _ => None,
        };
        let image: Option<ImageContent> = match task_output(record, spec.index, TaskKind::Image) {
            Some(TaskPayload::Image(image)) => Some(image.clone()),
            _ => None,
        };

        match record
            .artifacts
            .iter_mut()
            .find(|a| a.section_index == spec.index)
        {
            Some(artifact) => {
                let text = text.or_else(|| artifact.text.clone());
                let image = image.or_else(|| artifact.image.clone());
                *artifact = artifact.next_version(spec.title.clone(), text, image);
            }
            None => {
                if let Some(text) = text {
                    let image = image.unwrap_or_else(|| runner.fallback_image(spec));
                    record.artifacts.push(SectionArtifact::new(
                        spec.index,
                        spec.title.clone(),
                        Some(text),
                        Some(image),
                    ));
                }
            }
        }
    }
    record.artifacts.sort_by_key(|a| a.section_index);
}

/// Placeholder images count as degraded output and are generated again on resume
fn reissue_placeholder_images(record: &mut Checkpoint) {
    let placeholder_tasks: Vec<String> = record
        .outputs
        .iter()
        .filter(|(_, payload)| matches!(payload, TaskPayload::Image(image) if image.placeholder))
        .map(|(task_id, _)| task_id.clone())
        .collect();
    for task in record.tasks.iter_mut() {
        if placeholder_tasks.contains(&task.task_id) {
            task.status = TaskStatus::Pending;
        }
    }
}
