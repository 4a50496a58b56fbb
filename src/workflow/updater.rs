//! Targeted section updates.
//!
//! Regenerates one section of a finished or degraded run under optimistic
//! concurrency: the caller names the ETag it last saw, generation runs unlocked,
//! and the swap re-checks the ETag under the run lock. Of two racing updates from
//! the same ETag exactly one wins; the other gets `ApiError::Conflict`.

use crate::artifact::{SectionArtifact, SectionSpec};
use crate::error::ApiError;
use crate::scheduler::{SlideTask, TaskKind, TaskPayload, TaskStatus};
use crate::types::{RunId, SectionIndex};
use crate::workflow::orchestrator::Orchestrator;
use crate::workflow::runner::{task_fingerprint, SectionTaskRunner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTarget {
    Content,
    Image,
    #[default]
    Both,
}

impl UpdateTarget {
    fn kinds(&self) -> &'static [TaskKind] {
        match self {
            UpdateTarget::Content => &[TaskKind::Content],
            UpdateTarget::Image => &[TaskKind::Image],
            UpdateTarget::Both => &[TaskKind::Content, TaskKind::Image],
        }
    }
}

/// Changes requested for one section; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionUpdate {
    pub title: Option<String>,
    pub key_points: Option<Vec<String>>,
    pub instructions: Option<String>,
    #[serde(default)]
    pub target: UpdateTarget,
}

impl SectionUpdate {
    pub fn new(target: UpdateTarget) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_key_points(mut self, key_points: Vec<String>) -> Self {
        self.key_points = Some(key_points);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    fn apply(&self, spec: &SectionSpec) -> SectionSpec {
        SectionSpec {
            index: spec.index,
            title: self.title.clone().unwrap_or_else(|| spec.title.clone()),
            key_points: self
                .key_points
                .clone()
                .unwrap_or_else(|| spec.key_points.clone()),
        }
    }
}

impl Orchestrator {
    /// Regenerate one section, guarded by the ETag the caller last observed
    pub async fn update_section(
        &self,
        run_id: &RunId,
        section_index: SectionIndex,
        update: SectionUpdate,
        expected_etag: &str,
    ) -> Result<SectionArtifact, ApiError> {
        let slot = self.load_slot(run_id)?;

        let (request, mut outline) = {
            let record = slot.record.lock();
            if !record.state.artifacts_available() {
                return Err(ApiError::ArtifactsNotReady {
                    run_id: run_id.to_string(),
                    state: record.state.to_string(),
                });
            }
            let artifact = record
                .artifact(section_index)
                .ok_or_else(|| ApiError::SectionNotFound {
                    run_id: run_id.to_string(),
                    section_index,
                })?;
            check_etag(artifact, expected_etag)?;
            let outline = record.outline.clone().ok_or_else(|| ApiError::SectionNotFound {
                run_id: run_id.to_string(),
                section_index,
            })?;
            (record.request.clone(), outline)
        };

        let spec = outline
            .section(section_index)
            .map(|spec| update.apply(spec))
            .ok_or_else(|| ApiError::SectionNotFound {
                run_id: run_id.to_string(),
                section_index,
            })?;
        if let Some(current) = outline.section_mut(section_index) {
            *current = spec.clone();
        }

        let instructions = update.instructions.as_deref();
        let batch: Vec<SlideTask> = update
            .target
            .kinds()
            .iter()
            .map(|&kind| {
                SlideTask::new(
                    run_id.as_str(),
                    section_index,
                    kind,
                    task_fingerprint(&request, &spec, kind, instructions),
                )
                .bypassing_cache()
            })
            .collect();
        info!(
            run_id = %run_id,
            section = section_index,
            target = ?update.target,
            "Regenerating section"
        );

        let mut runner = SectionTaskRunner::new(
            Arc::clone(&self.services),
            run_id.clone(),
            request,
            outline.clone(),
        );
        if let Some(instructions) = &update.instructions {
            runner = runner.with_instructions(section_index, instructions.clone());
        }
        let results = self
            .scheduler
            .schedule(batch, Arc::new(runner), &CancellationToken::new())
            .await;
        if let Some(failure) = results.failures.first() {
            warn!(
                run_id = %run_id,
                section = section_index,
                reason = %failure.reason,
                "Section update failed"
            );
            return Err(ApiError::GenerationFailed(format!(
                "section {} {}: {}",
                section_index, failure.kind, failure.reason
            )));
        }

        let mut record = slot.record.lock();
        let current = record
            .artifact(section_index)
            .cloned()
            .ok_or_else(|| ApiError::SectionNotFound {
                run_id: run_id.to_string(),
                section_index,
            })?;
        check_etag(&current, expected_etag)?;

        let mut text = current.text.clone();
        let mut image = current.image.clone();
        let mut next = record.clone();
        for outcome in &results.outcomes {
            let Ok(output) = &outcome.result else {
                continue;
            };
            match &output.payload {
                TaskPayload::Content(content) => text = Some(content.clone()),
                TaskPayload::Image(generated) => image = Some(generated.clone()),
            }
            // Superseded fingerprints no longer describe this section
            if let Some(task) = next
                .tasks
                .iter_mut()
                .find(|t| t.section_index == section_index && t.kind == outcome.task.kind)
            {
                if task.fingerprint != outcome.task.fingerprint {
                    self.services.cache.invalidate(&task.fingerprint);
                }
                task.fingerprint = outcome.task.fingerprint;
                task.status = TaskStatus::Succeeded;
                task.bypass_cache = false;
                next.outputs
                    .insert(task.task_id.clone(), output.payload.clone());
            }
        }
        let updated = current.next_version(spec.title.clone(), text, image);
        if let Some(slot_artifact) = next
            .artifacts
            .iter_mut()
            .find(|a| a.section_index == section_index)
        {
            *slot_artifact = updated.clone();
        }
        let report = self
            .consistency
            .review_scoped(&outline, &next.artifacts, section_index);
        next.outline = Some(outline);
        if !report.is_clean() {
            debug!(
                run_id = %run_id,
                section = section_index,
                violations = report.violations.len(),
                "Scoped review found violations"
            );
        }
        next.consistency = Some(report);
        self.commit_update(&mut record, next)?;

        info!(
            run_id = %run_id,
            section = section_index,
            version = updated.version,
            etag = %updated.etag,
            "Section updated"
        );
        Ok(updated)
    }
}

fn check_etag(artifact: &SectionArtifact, expected: &str) -> Result<(), ApiError> {
    if artifact.etag == expected {
        Ok(())
    } else {
        Err(ApiError::Conflict {
            section_index: artifact.section_index,
            expected: expected.to_string(),
            current: artifact.etag.clone(),
        })
    }
}
