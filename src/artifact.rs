//! Outline and section artifact types.
//!
//! A `SectionArtifact` is the unit the caller sees. Each write produces a new
//! version whose ETag is derived from the version number and the content, so a
//! caller holding an ETag holds exactly one version.

use crate::types::SectionIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One planned section of a deck
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub index: SectionIndex,
    pub title: String,
    pub key_points: Vec<String>,
}

/// Ordered section plan; exactly one per run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub sections: Vec<SectionSpec>,
}

impl Outline {
    pub fn new(sections: Vec<SectionSpec>) -> Self {
        Self { sections }
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section(&self, index: SectionIndex) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.index == index)
    }

    pub fn section_mut(&mut self, index: SectionIndex) -> Option<&mut SectionSpec> {
        self.sections.iter_mut().find(|s| s.index == index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub body: String,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageContent {
    pub image_ref: String,
    pub alt_text: String,
    pub placeholder: bool,
    /// Provider that produced the image (`placeholder` for the fallback generator)
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionArtifact {
    pub section_index: SectionIndex,
    pub title: String,
    pub text: Option<TextContent>,
    pub image: Option<ImageContent>,
    pub version: u64,
    pub etag: String,
    pub updated_at: DateTime<Utc>,
}

impl SectionArtifact {
    /// First version of a section
    pub fn new(
        section_index: SectionIndex,
        title: impl Into<String>,
        text: Option<TextContent>,
        image: Option<ImageContent>,
    ) -> Self {
        Self::at_version(section_index, title.into(), text, image, 1)
    }

    /// Successor version carrying new content. Versions only move forward.
    pub fn next_version(
        &self,
        title: impl Into<String>,
        text: Option<TextContent>,
        image: Option<ImageContent>,
    ) -> Self {
        Self::at_version(self.section_index, title.into(), text, image, self.version + 1)
    }

    fn at_version(
        section_index: SectionIndex,
        title: String,
        text: Option<TextContent>,
        image: Option<ImageContent>,
        version: u64,
    ) -> Self {
        let etag = compute_etag(section_index, version, text.as_ref(), image.as_ref());
        Self {
            section_index,
            title,
            text,
            image,
            version,
            etag,
            updated_at: Utc::now(),
        }
    }

    pub fn has_placeholder(&self) -> bool {
        self.text.as_ref().is_some_and(|t| t.placeholder)
            || self.image.as_ref().is_some_and(|i| i.placeholder)
    }

    pub fn body(&self) -> &str {
        self.text.as_ref().map(|t| t.body.as_str()).unwrap_or("")
    }

    pub fn is_text_empty(&self) -> bool {
        self.body().trim().is_empty()
    }
}

/// `{version}-{hex16}`, hex16 being the first 16 hex chars of the content digest
pub fn compute_etag(
    section_index: SectionIndex,
    version: u64,
    text: Option<&TextContent>,
    image: Option<&ImageContent>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"deckflow-etag-v1");
    hasher.update(&(section_index as u64).to_le_bytes());
    hasher.update(&version.to_le_bytes());
    match text {
        Some(text) => {
            hasher.update(&[1, text.placeholder as u8]);
            update_str(&mut hasher, &text.body);
        }
        None => {
            hasher.update(&[0]);
        }
    }
    match image {
        Some(image) => {
            hasher.update(&[1, image.placeholder as u8]);
            update_str(&mut hasher, &image.image_ref);
            update_str(&mut hasher, &image.alt_text);
            update_str(&mut hasher, &image.provider);
        }
        None => {
            hasher.update(&[0]);
        }
    }
    let digest = hasher.finalize();
    format!("{}-{}", version, &digest.to_hex()[..16])
}

/// Version number encoded in an ETag, if well formed
pub fn etag_version(etag: &str) -> Option<u64> {
    let (version, digest) = etag.split_once('-')?;
    if digest.len() != 16 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    version.parse().ok()
}

fn update_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
