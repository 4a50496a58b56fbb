//! Fingerprint computation for cacheable generation operations
//!
//! Fingerprint = hash("deckflow-fp-v1" || kind || for each (key, value) sorted by key:
//! key_len || key || value_len || value)
//!
//! Values are canonicalized before hashing (Unicode NFC, trimmed, internal whitespace
//! collapsed), so requests that differ only in formatting share a key.

use crate::types::Fingerprint;
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

const FINGERPRINT_DOMAIN: &[u8] = b"deckflow-fp-v1";

/// Kind of cacheable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Outline,
    SectionText,
    SectionImage,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Outline => "outline",
            OperationKind::SectionText => "section_text",
            OperationKind::SectionImage => "section_image",
        }
    }
}

/// Canonicalize free text for hashing.
pub fn canonicalize_text(input: &str) -> String {
    let normalized: String = input.nfc().collect();
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Builder collecting the normalized inputs of one operation.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    kind: OperationKind,
    params: BTreeMap<String, String>,
}

impl FingerprintBuilder {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    /// Add a text parameter; key and value are both canonicalized.
    pub fn param(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.params
            .insert(canonicalize_text(key), canonicalize_text(value.as_ref()));
        self
    }

    /// Add an ordered list parameter (order is significant, formatting is not).
    pub fn list_param<I, S>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = values
            .into_iter()
            .map(|v| canonicalize_text(v.as_ref()))
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
            .join("\u{1f}");
        self.params.insert(canonicalize_text(key), joined);
        self
    }

    /// Add every entry of a map; key order in the source map is irrelevant.
    pub fn map_params<'a, I>(mut self, prefix: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in entries {
            let full_key = format!("{}.{}", prefix, canonicalize_text(key));
            self.params.insert(full_key, canonicalize_text(value));
        }
        self
    }

    pub fn build(&self) -> Fingerprint {
        compute_fingerprint(self.kind, &self.params)
    }
}

/// Compute a fingerprint from already canonicalized parameters
pub fn compute_fingerprint(kind: OperationKind, params: &BTreeMap<String, String>) -> Fingerprint {
    let mut hasher = Hasher::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update(b"kind:");
    hasher.update(kind.as_str().as_bytes());

    for (key, value) in params {
        hasher.update(&(key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.update(&(value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    }

    Fingerprint(*hasher.finalize().as_bytes())
}
