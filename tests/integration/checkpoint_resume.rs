//! Resuming runs from stored checkpoints

use deckflow::artifact::{ImageContent, Outline, SectionSpec, TextContent};
use deckflow::checkpoint::{Checkpoint, CheckpointStore};
use deckflow::provider::MockProvider;
use deckflow::scheduler::{TaskKind, TaskPayload, TaskStatus};
use deckflow::store::{DurableStore, SledStore};
use deckflow::types::RunId;
use deckflow::workflow::runner::build_tasks;
use deckflow::workflow::{GenerationRequest, RunState};
use deckflow::Orchestrator;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

use crate::integration::{fast_config, memory_store, section_prompts, single_chain};

fn tidal_outline() -> Outline {
    Outline::new(
        (0..4)
            .map(|index| SectionSpec {
                index,
                title: format!("Tidal energy: part {}", index + 1),
                key_points: vec![format!("Tidal energy fundamentals {}", index + 1)],
            })
            .collect(),
    )
}

/// Writes Created, OutlineReady and a SectionsScheduled snapshot in which the
/// first `done` sections already succeeded
fn seed_scheduled_run(store: &Arc<dyn DurableStore>, done: usize) -> RunId {
    let checkpoints = CheckpointStore::new(Arc::clone(store));
    let run_id = RunId::new();
    let request = GenerationRequest::new("Tidal energy", 4);
    let outline = tidal_outline();

    let mut record = Checkpoint::created(run_id.clone(), request.clone());
    checkpoints.append(&record).unwrap();

    record.seq = 1;
    record.state = RunState::OutlineReady;
    record.outline = Some(outline.clone());
    checkpoints.append(&record).unwrap();

    let mut tasks = build_tasks(&run_id, &request, &outline);
    let mut outputs = BTreeMap::new();
    for task in tasks.iter_mut().filter(|t| t.section_index < done) {
        task.status = TaskStatus::Succeeded;
        let payload = match task.kind {
            TaskKind::Content => TaskPayload::Content(TextContent {
                body: format!(
                    "Tidal energy: part {}. Restored notes on tidal energy fundamentals.",
                    task.section_index + 1
                ),
                placeholder: false,
            }),
            TaskKind::Image => TaskPayload::Image(ImageContent {
                image_ref: format!("restored://{}", task.section_index),
                alt_text: "restored illustration".to_string(),
                placeholder: false,
                provider: "earlier".to_string(),
            }),
        };
        outputs.insert(task.task_id.clone(), payload);
    }
    record.seq = 2;
    record.state = RunState::SectionsScheduled;
    record.tasks = tasks;
    record.outputs = outputs;
    checkpoints.append(&record).unwrap();
    run_id
}

#[tokio::test]
async fn resume_skips_tasks_that_already_succeeded() {
    let store = memory_store();
    let run_id = seed_scheduled_run(&store, 2);

    let mut config = fast_config();
    config.workflow.max_consistency_rounds = 0;
    let text = Arc::new(MockProvider::offline("text"));
    let image = Arc::new(MockProvider::offline("image"));
    let orch = single_chain(&config, Arc::clone(&store), text.clone(), image.clone());

    let status = orch.resume(&run_id).await.unwrap();
    assert_eq!(status.state, RunState::Finalized);
    assert_eq!(status.completed_sections, 4);

    // Only sections 3 and 4 reached the providers
    let prompts = section_prompts(&text);
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|p| !p.contains("part 1") && !p.contains("part 2")));
    assert_eq!(image.call_count(), 2);

    let (_, artifacts) = orch.get_artifacts(&run_id).unwrap();
    assert_eq!(artifacts.len(), 4);
    assert!(artifacts[0].body().contains("Restored notes"));
    assert_eq!(artifacts[1].image.as_ref().unwrap().provider, "earlier");
    assert_eq!(artifacts[3].image.as_ref().unwrap().provider, "image");

    let history = orch.checkpoints().history(&run_id).unwrap();
    let seqs: Vec<u64> = history.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, (0..history.len() as u64).collect::<Vec<_>>());
    assert_eq!(history.last().unwrap().state, RunState::Finalized);
}

#[tokio::test]
async fn resume_of_unknown_run_is_reported() {
    let orch = single_chain(
        &fast_config(),
        memory_store(),
        Arc::new(MockProvider::offline("text")),
        Arc::new(MockProvider::offline("image")),
    );
    let result = orch.resume(&RunId::from("missing-run")).await;
    assert!(matches!(result, Err(deckflow::ApiError::RunNotFound(_))));
}

#[tokio::test]
async fn sled_store_keeps_runs_across_restarts() {
    let dir = TempDir::new().unwrap();
    let request = || GenerationRequest::new("Volcanic soils", 3);

    let run_id = {
        let store: Arc<dyn DurableStore> = Arc::new(SledStore::new(dir.path()).unwrap());
        let orch = Orchestrator::from_config(&fast_config(), store).unwrap();
        let status = orch.generate(request()).await.unwrap();
        assert_eq!(status.state, RunState::Finalized);
        status.run_id
    };

    let store: Arc<dyn DurableStore> = Arc::new(SledStore::new(dir.path()).unwrap());
    let orch = Orchestrator::from_config(&fast_config(), store).unwrap();

    let status = orch.get_status(&run_id).unwrap();
    assert_eq!(status.state, RunState::Finalized);
    assert_eq!(status.completed_sections, 3);

    let runs = orch.list_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].topic, "Volcanic soils");

    let (_, artifacts) = orch.get_artifacts(&run_id).unwrap();
    assert_eq!(artifacts.len(), 3);

    // The outline is served from the durable cache tier after the restart
    let again = orch.generate(request()).await.unwrap();
    assert_eq!(again.state, RunState::Finalized);
    assert!(orch.cache_stats().durable_hits >= 1);
}
