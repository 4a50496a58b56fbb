//! Scripted and offline providers.
//!
//! `MockProvider` plays back a script of responses and then falls back to either a
//! repeated response or a deterministic offline responder. The offline responder
//! understands the prompts rendered by [`crate::prompt`], so a full run completes
//! without network access.

use crate::error::ProviderError;
use crate::prompt;
use crate::provider::{GenerationParams, ImageProvider, Provider, TextProvider};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const STALL_DURATION: Duration = Duration::from_secs(3600);

/// One scripted provider reply
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    Success(String),
    Failure(ProviderError),
    /// Never answers within any reasonable timeout
    Stall,
}

pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<MockResponse>>,
    repeat: Option<MockResponse>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    /// Deterministic responder with no script
    pub fn offline(name: &str) -> Self {
        Self::build(name, Vec::new(), None)
    }

    /// Plays `responses` in order, then answers offline
    pub fn scripted(name: &str, responses: Vec<MockResponse>) -> Self {
        Self::build(name, responses, None)
    }

    /// Answers every call with `response`
    pub fn always(name: &str, response: MockResponse) -> Self {
        Self::build(name, Vec::new(), Some(response))
    }

    fn build(name: &str, responses: Vec<MockResponse>, repeat: Option<MockResponse>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(responses.into()),
            repeat,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn next_response(&self) -> Option<MockResponse> {
        self.script
            .lock()
            .pop_front()
            .or_else(|| self.repeat.clone())
    }

    async fn respond(
        &self,
        prompt: &str,
        offline: impl FnOnce(&str) -> String,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_response() {
            Some(MockResponse::Success(text)) => Ok(text),
            Some(MockResponse::Failure(err)) => Err(err),
            Some(MockResponse::Stall) => {
                tokio::time::sleep(STALL_DURATION).await;
                Err(ProviderError::Timeout(format!("{} stalled", self.name)))
            }
            None => Ok(offline(prompt)),
        }
    }
}

impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl TextProvider for MockProvider {
    async fn generate_text(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        self.respond(prompt, offline_text).await
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    async fn generate_image(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let name = self.name.clone();
        self.respond(prompt, move |p| offline_image(&name, p)).await
    }
}

fn offline_text(prompt: &str) -> String {
    if let Some(count) = prompt::requested_section_count(prompt) {
        let topic = prompt::field(prompt, "Topic").unwrap_or("the topic");
        return (1..=count)
            .map(|n| {
                format!(
                    "## {topic}: part {n}\n- {topic} fundamentals {n}\n- {topic} in practice {n}\n"
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
    }

    let title = prompt::field(prompt, "Title").unwrap_or("Untitled");
    let topic = prompt::field(prompt, "Topic").unwrap_or("the topic");
    let points = prompt::field(prompt, "Key points").unwrap_or("");
    format!(
        "{title}. This section explains {topic}, covering {points}. It closes with a short summary of {title}."
    )
}

fn offline_image(provider: &str, prompt: &str) -> String {
    let digest = blake3::hash(prompt.as_bytes());
    format!("mock://{}/{}", provider, &digest.to_hex()[..16])
}
