//! Generation requests and submit-time validation.

use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tone and audience hints carried into every prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleParams {
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_tone() -> String {
    "informative".to_string()
}

fn default_audience() -> String {
    "general".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

impl Default for StyleParams {
    fn default() -> Self {
        Self {
            tone: default_tone(),
            audience: default_audience(),
            language: default_language(),
            extra: BTreeMap::new(),
        }
    }
}

impl StyleParams {
    /// Flattened view used for fingerprints and provider params
    pub fn as_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("tone".to_string(), self.tone.clone());
        map.insert("audience".to_string(), self.audience.clone());
        map.insert("language".to_string(), self.language.clone());
        map
    }
}

/// Allowed request shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBounds {
    pub min_sections: usize,
    pub max_sections: usize,
    pub max_topic_chars: usize,
}

impl Default for RequestBounds {
    fn default() -> Self {
        Self {
            min_sections: 3,
            max_sections: 50,
            max_topic_chars: 500,
        }
    }
}

/// Immutable description of one deck to generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub request_id: String,
    pub topic: String,
    pub section_count: usize,
    pub style: StyleParams,
    pub created_at: DateTime<Utc>,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>, section_count: usize) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            section_count,
            style: StyleParams::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_style(mut self, style: StyleParams) -> Self {
        self.style = style;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn validate(&self, bounds: &RequestBounds) -> Result<(), ApiError> {
        if self.request_id.trim().is_empty() {
            return Err(ApiError::Validation("request_id cannot be empty".to_string()));
        }
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(ApiError::Validation("topic cannot be empty".to_string()));
        }
        let chars = topic.chars().count();
        if chars > bounds.max_topic_chars {
            return Err(ApiError::Validation(format!(
                "topic is {} characters, maximum is {}",
                chars, bounds.max_topic_chars
            )));
        }
        if self.section_count < bounds.min_sections || self.section_count > bounds.max_sections {
            return Err(ApiError::Validation(format!(
                "section_count {} out of bounds {}..={}",
                self.section_count, bounds.min_sections, bounds.max_sections
            )));
        }
        Ok(())
    }
}
