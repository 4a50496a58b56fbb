//! OpenAI-compatible HTTP client implementing both text and image capabilities.

use crate::error::{ApiError, ProviderError};
use crate::provider::{GenerationParams, ImageProvider, Provider, TextProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

/// Map transport-level failures onto the retry taxonomy
fn map_http_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ProviderError::Unavailable(format!("Connection error: {}", error))
    } else if let Some(status) = error.status() {
        map_status(status, error.to_string())
    } else {
        ProviderError::Unavailable(format!("HTTP error: {}", error))
    }
}

fn map_status(status: StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited(format!("Rate limit exceeded: {}", body)),
        401 | 403 => ProviderError::AuthFailed(format!("Authentication failed: {}", body)),
        400 | 404 | 413 | 422 => {
            ProviderError::InvalidInput(format!("Request rejected ({}): {}", status, body))
        }
        408 => ProviderError::Timeout(format!("Upstream timeout: {}", body)),
        _ => ProviderError::Unavailable(format!("Request failed with status {}: {}", status, body)),
    }
}

/// Client for OpenAI-compatible `/chat/completions` and `/images/generations` endpoints
pub struct OpenAiCompatibleClient {
    client: Client,
    name: String,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: String,
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
            .timeout(request_timeout.unwrap_or(PROVIDER_HTTP_REQUEST_TIMEOUT))
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            name,
            model,
            api_key,
            base_url,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    async fn post_json<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status, error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {}", e)))
    }
}

impl Provider for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl TextProvider for OpenAiCompatibleClient {
    async fn generate_text(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if !params.style.is_empty() {
            let style = params
                .style
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(ChatMessage {
                role: "system",
                content: format!("Follow this style guide.\n{}", style),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt.to_string(),
        });

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: false,
        };
        let completion: ChatCompletionResponse = self.post_json("chat/completions", &request).await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse("No content in response".to_string()))
    }
}

#[async_trait]
impl ImageProvider for OpenAiCompatibleClient {
    async fn generate_image(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let request = ImageGenerationRequest {
            model: &self.model,
            prompt,
            n: 1,
        };
        let generated: ImageGenerationResponse =
            self.post_json("images/generations", &request).await?;

        generated
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ProviderError::MalformedResponse("No image URL in response".to_string()))
    }
}
