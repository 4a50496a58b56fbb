//! Generative Provider Abstraction
//!
//! Text and image generation are opaque capabilities behind two traits. A provider
//! chain is an ordered `Vec` of implementations; the retry/fallback executor walks
//! the chain, so business logic never branches on which provider is in use.

use crate::error::{ApiError, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub mod mock;
pub mod openai;
pub mod placeholder;

pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiCompatibleClient;
pub use placeholder::PlaceholderImageGenerator;

/// Generation parameters passed through to providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Free-form style hints (tone, audience, language, ...)
    #[serde(default)]
    pub style: BTreeMap<String, String>,
}

/// Which generative capability a provider chain serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Text,
    Image,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Text => write!(f, "text"),
            Capability::Image => write!(f, "image"),
        }
    }
}

/// Identity shared by every provider implementation
pub trait Provider: Send + Sync {
    /// Stable name used for logs and provenance; breakers key on it per capability
    fn name(&self) -> &str;
}

/// Text generation capability
#[async_trait]
pub trait TextProvider: Provider {
    async fn generate_text(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;
}

/// Image generation capability; returns an opaque image reference (URL or URI)
#[async_trait]
pub trait ImageProvider: Provider {
    async fn generate_image(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;
}

pub type TextChain = Vec<Arc<dyn TextProvider>>;
pub type ImageChain = Vec<Arc<dyn ImageProvider>>;

/// Provider implementation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// OpenAI-compatible HTTP API (OpenAI, Azure, local gateways)
    #[serde(alias = "openai")]
    OpenAi,
    /// Deterministic offline provider
    Mock,
}

/// One configured provider in a chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key (read at client construction)
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn mock(name: &str) -> Self {
        Self {
            name: name.to_string(),
            provider_type: ProviderType::Mock,
            model: "mock".to_string(),
            endpoint: None,
            api_key: None,
            api_key_env: None,
            request_timeout_secs: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Provider name cannot be empty".to_string());
        }
        if self.provider_type == ProviderType::OpenAi {
            if self.model.trim().is_empty() {
                return Err("Model name cannot be empty".to_string());
            }
            if let Some(endpoint) = &self.endpoint {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(format!("Invalid endpoint URL: {}", endpoint));
                }
            }
        }
        Ok(())
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_ref()
                .and_then(|var| std::env::var(var).ok())
        })
    }
}

/// Ordered provider chains for both capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub text: Vec<ProviderConfig>,
    #[serde(default)]
    pub image: Vec<ProviderConfig>,
}

impl ProvidersConfig {
    /// Offline chains: one mock text provider, one mock image provider
    pub fn offline() -> Self {
        Self {
            text: vec![ProviderConfig::mock("mock-text")],
            image: vec![ProviderConfig::mock("mock-image")],
        }
    }
}

/// Builds provider chains from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn text_chain(configs: &[ProviderConfig]) -> Result<TextChain, ApiError> {
        let mut chain: TextChain = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate().map_err(ApiError::ConfigError)?;
            match config.provider_type {
                ProviderType::OpenAi => chain.push(Arc::new(Self::http_client(config)?)),
                ProviderType::Mock => chain.push(Arc::new(MockProvider::offline(&config.name))),
            }
        }
        Ok(chain)
    }

    pub fn image_chain(configs: &[ProviderConfig]) -> Result<ImageChain, ApiError> {
        let mut chain: ImageChain = Vec::with_capacity(configs.len());
        for config in configs {
            config.validate().map_err(ApiError::ConfigError)?;
            match config.provider_type {
                ProviderType::OpenAi => chain.push(Arc::new(Self::http_client(config)?)),
                ProviderType::Mock => chain.push(Arc::new(MockProvider::offline(&config.name))),
            }
        }
        Ok(chain)
    }

    fn http_client(config: &ProviderConfig) -> Result<OpenAiCompatibleClient, ApiError> {
        OpenAiCompatibleClient::new(
            config.name.clone(),
            config.model.clone(),
            config.resolve_api_key(),
            config.endpoint.clone(),
            config.request_timeout_secs.map(Duration::from_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_validation() {
        let mut config = ProviderConfig {
            name: "primary".to_string(),
            provider_type: ProviderType::OpenAi,
            model: "gpt-4o-mini".to_string(),
            endpoint: Some("https://api.openai.com/v1".to_string()),
            api_key: Some("test-key".to_string()),
            api_key_env: None,
            request_timeout_secs: None,
        };
        assert!(config.validate().is_ok());

        config.endpoint = Some("not-a-url".to_string());
        assert!(config.validate().is_err());

        config.endpoint = None;
        config.model = " ".to_string();
        assert!(config.validate().is_err());

        assert!(ProviderConfig::mock("m").validate().is_ok());
    }

    #[test]
    fn test_factory_preserves_chain_order() {
        let configs = vec![ProviderConfig::mock("first"), ProviderConfig::mock("second")];
        let chain = ProviderFactory::text_chain(&configs).unwrap();
        let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_provider_type_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            provider_type: ProviderType,
        }
        let parsed: Wrapper = toml::from_str("provider_type = \"openai\"").unwrap();
        assert_eq!(parsed.provider_type, ProviderType::OpenAi);
        let parsed: Wrapper = toml::from_str("provider_type = \"open_ai\"").unwrap();
        assert_eq!(parsed.provider_type, ProviderType::OpenAi);
    }

    #[test]
    fn test_api_key_env_resolution() {
        let config = ProviderConfig {
            api_key_env: Some("DECKFLOW_TEST_PROVIDER_KEY_UNSET".to_string()),
            ..ProviderConfig::mock("m")
        };
        assert!(config.resolve_api_key().is_none());
    }
}
