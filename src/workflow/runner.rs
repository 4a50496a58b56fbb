//! Generation of outlines and section tasks through the cache and the executor.

use crate::artifact::{ImageContent, Outline, SectionSpec, TextContent};
use crate::cache::fingerprint::{FingerprintBuilder, OperationKind};
use crate::cache::CacheManager;
use crate::error::{ApiError, ExecutorError, ProviderError};
use crate::prompt;
use crate::provider::placeholder::PLACEHOLDER_PROVIDER;
use crate::provider::{
    Capability, ImageChain, ImageProvider, PlaceholderImageGenerator, TextChain, TextProvider,
};
use crate::retry::FallbackExecutor;
use crate::scheduler::{SlideTask, TaskKind, TaskOutput, TaskPayload, TaskRunner};
use crate::types::{Fingerprint, RunId, SectionIndex};
use crate::workflow::request::GenerationRequest;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Process-wide collaborators shared by every run
pub struct GenerationServices {
    pub cache: Arc<CacheManager>,
    pub executor: Arc<FallbackExecutor>,
    pub text_providers: TextChain,
    pub image_providers: ImageChain,
    pub placeholder: PlaceholderImageGenerator,
}

pub fn outline_fingerprint(request: &GenerationRequest) -> Fingerprint {
    let style = request.style.as_map();
    FingerprintBuilder::new(OperationKind::Outline)
        .param("topic", &request.topic)
        .param("section_count", request.section_count.to_string())
        .map_params("style", &style)
        .build()
}

pub fn task_fingerprint(
    request: &GenerationRequest,
    spec: &SectionSpec,
    kind: TaskKind,
    instructions: Option<&str>,
) -> Fingerprint {
    let style = request.style.as_map();
    let operation = match kind {
        TaskKind::Content => OperationKind::SectionText,
        TaskKind::Image => OperationKind::SectionImage,
    };
    let mut builder = FingerprintBuilder::new(operation)
        .param("topic", &request.topic)
        .param("section_count", request.section_count.to_string())
        .param("index", spec.index.to_string())
        .param("title", &spec.title)
        .list_param("key_points", &spec.key_points)
        .map_params("style", &style);
    if let Some(instructions) = instructions {
        builder = builder.param("instructions", instructions);
    }
    builder.build()
}

/// One content task and one image task per outline section
pub fn build_tasks(run_id: &RunId, request: &GenerationRequest, outline: &Outline) -> Vec<SlideTask> {
    let mut tasks = Vec::with_capacity(outline.len() * 2);
    for spec in &outline.sections {
        for kind in [TaskKind::Content, TaskKind::Image] {
            tasks.push(SlideTask::new(
                run_id.as_str(),
                spec.index,
                kind,
                task_fingerprint(request, spec, kind, None),
            ));
        }
    }
    tasks
}

/// Outline from cache, else from the text provider chain
pub async fn generate_outline(
    services: &GenerationServices,
    request: &GenerationRequest,
) -> Result<Outline, ApiError> {
    let fingerprint = outline_fingerprint(request);
    if let Some(outline) = services.cache.get_json::<Outline>(&fingerprint) {
        if outline.len() == request.section_count {
            debug!(fingerprint = %fingerprint.short(), "Outline served from cache");
            return Ok(outline);
        }
    }

    let rendered = prompt::outline_prompt(&request.topic, request.section_count, &request.style);
    let params = prompt::generation_params(&request.style);
    let expected = request.section_count;
    let (rendered, params) = (rendered.as_str(), &params);
    let executed = services
        .executor
        .execute("outline", Capability::Text, &services.text_providers, |provider| async move {
            let response = provider.generate_text(rendered, params).await?;
            prompt::parse_outline(&response, expected)
        })
        .await?;

    services.cache.put_json(fingerprint, &executed.value, None);
    Ok(executed.value)
}

/// Provider attempts recorded in an executor error
fn attempts_made(err: &ExecutorError) -> u32 {
    match err {
        ExecutorError::AllProvidersExhausted { failures, .. } => {
            failures.iter().filter(|f| f.attempt > 0).count() as u32
        }
        ExecutorError::Permanent { .. } => 1,
        ExecutorError::NoProviders(_) => 0,
    }
}

/// Runs the section tasks of one run
pub struct SectionTaskRunner {
    services: Arc<GenerationServices>,
    run_id: RunId,
    request: GenerationRequest,
    outline: Outline,
    instructions: HashMap<SectionIndex, String>,
}

impl SectionTaskRunner {
    pub fn new(
        services: Arc<GenerationServices>,
        run_id: RunId,
        request: GenerationRequest,
        outline: Outline,
    ) -> Self {
        Self {
            services,
            run_id,
            request,
            outline,
            instructions: HashMap::new(),
        }
    }

    pub fn with_instructions(mut self, section_index: SectionIndex, instructions: String) -> Self {
        self.instructions.insert(section_index, instructions);
        self
    }

    fn cached(&self, task: &SlideTask) -> Option<TaskOutput> {
        if task.bypass_cache {
            return None;
        }
        let payload = self.services.cache.get_json::<TaskPayload>(&task.fingerprint)?;
        let matches_kind = matches!(
            (&payload, task.kind),
            (TaskPayload::Content(_), TaskKind::Content) | (TaskPayload::Image(_), TaskKind::Image)
        );
        matches_kind.then_some(TaskOutput {
            payload,
            attempts: 0,
            cached: true,
        })
    }

    /// Cache a fresh output. A regeneration that bypassed the cache supersedes
    /// the entry it skipped rather than rewriting it.
    fn store(&self, task: &SlideTask, payload: &TaskPayload) {
        if task.bypass_cache {
            self.services
                .cache
                .replace_json(task.fingerprint, payload, None);
        } else {
            self.services.cache.put_json(task.fingerprint, payload, None);
        }
    }

    async fn generate_content(
        &self,
        task: &SlideTask,
        spec: &SectionSpec,
    ) -> Result<TaskOutput, ApiError> {
        let rendered = prompt::section_prompt(
            &self.request.topic,
            self.request.section_count,
            spec,
            &self.request.style,
            self.instructions.get(&spec.index).map(String::as_str),
        );
        let params = prompt::generation_params(&self.request.style);
        let (rendered, params) = (rendered.as_str(), &params);
        let executed = self
            .services
            .executor
            .execute("section_text", Capability::Text, &self.services.text_providers, |provider| async move {
                let body = provider.generate_text(rendered, params).await?;
                let body = body.trim();
                if body.is_empty() {
                    return Err(ProviderError::MalformedResponse(
                        "empty section body".to_string(),
                    ));
                }
                Ok(body.to_string())
            })
            .await?;

        let payload = TaskPayload::Content(TextContent {
            body: executed.value,
            placeholder: false,
        });
        self.store(task, &payload);
        Ok(TaskOutput {
            payload,
            attempts: executed.attempts,
            cached: false,
        })
    }

    /// Image from the provider chain; on exhaustion a placeholder, which is not cached
    async fn generate_image(&self, task: &SlideTask, spec: &SectionSpec) -> TaskOutput {
        let rendered = prompt::image_prompt(
            &self.request.topic,
            spec,
            &self.request.style,
            self.instructions.get(&spec.index).map(String::as_str),
        );
        let params = prompt::generation_params(&self.request.style);
        let (prompt_ref, params_ref) = (rendered.as_str(), &params);
        let result = self
            .services
            .executor
            .execute("section_image", Capability::Image, &self.services.image_providers, |provider| async move {
                provider.generate_image(prompt_ref, params_ref).await
            })
            .await;

        match result {
            Ok(executed) => {
                let payload = TaskPayload::Image(ImageContent {
                    image_ref: executed.value,
                    alt_text: prompt::alt_text(spec),
                    placeholder: false,
                    provider: executed.provider,
                });
                self.store(task, &payload);
                TaskOutput {
                    payload,
                    attempts: executed.attempts,
                    cached: false,
                }
            }
            Err(err) => {
                warn!(
                    run_id = %self.run_id,
                    section = spec.index,
                    error = %err,
                    "Image providers exhausted, using placeholder"
                );
                TaskOutput {
                    payload: TaskPayload::Image(placeholder_image(
                        &self.services.placeholder,
                        spec,
                        &rendered,
                    )),
                    attempts: attempts_made(&err),
                    cached: false,
                }
            }
        }
    }

    /// Placeholder image for a section whose image task produced nothing
    pub fn fallback_image(&self, spec: &SectionSpec) -> ImageContent {
        let rendered = prompt::image_prompt(
            &self.request.topic,
            spec,
            &self.request.style,
            self.instructions.get(&spec.index).map(String::as_str),
        );
        placeholder_image(&self.services.placeholder, spec, &rendered)
    }
}

fn placeholder_image(
    generator: &PlaceholderImageGenerator,
    spec: &SectionSpec,
    prompt: &str,
) -> ImageContent {
    ImageContent {
        image_ref: generator.image_ref(spec.index, prompt),
        alt_text: prompt::alt_text(spec),
        placeholder: true,
        provider: PLACEHOLDER_PROVIDER.to_string(),
    }
}

#[async_trait]
impl TaskRunner for SectionTaskRunner {
    async fn run(&self, task: &SlideTask) -> Result<TaskOutput, ApiError> {
        let spec = self
            .outline
            .section(task.section_index)
            .ok_or_else(|| ApiError::SectionNotFound {
                run_id: self.run_id.to_string(),
                section_index: task.section_index,
            })?;

        if let Some(output) = self.cached(task) {
            debug!(task_id = %task.task_id, "Task served from cache");
            return Ok(output);
        }

        match task.kind {
            TaskKind::Content => self.generate_content(task, spec).await,
            TaskKind::Image => Ok(self.generate_image(task, spec).await),
        }
    }
}
