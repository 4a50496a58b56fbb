//! Consistency Manager
//!
//! Reviews a set of section artifacts against the outline and reports violations
//! with a suggested action. It never edits content; the orchestrator decides what
//! to do with the report.

use crate::artifact::{Outline, SectionArtifact};
use crate::types::SectionIndex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    /// Largest share of sections allowed to carry placeholder content
    #[serde(default = "default_max_placeholder_ratio")]
    pub max_placeholder_ratio: f64,
    /// Exclamation/question marks per 100 words above the run median that flag a tone outlier
    #[serde(default = "default_tone_outlier_threshold")]
    pub tone_outlier_threshold: f64,
    #[serde(default = "default_min_term_len")]
    pub min_term_len: usize,
}

fn default_max_placeholder_ratio() -> f64 {
    0.25
}

fn default_tone_outlier_threshold() -> f64 {
    5.0
}

fn default_min_term_len() -> usize {
    4
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            max_placeholder_ratio: default_max_placeholder_ratio(),
            tone_outlier_threshold: default_tone_outlier_threshold(),
            min_term_len: default_min_term_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    SectionCountMismatch,
    EmptySection,
    PlaceholderContent,
    PlaceholderRatioExceeded,
    TerminologyDrift,
    ToneMismatch,
    DuplicateTitle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuggestedAction {
    RegenerateSection,
    AcceptAsIs,
    FailRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub section_index: Option<SectionIndex>,
    pub kind: ViolationKind,
    pub action: SuggestedAction,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub violations: Vec<Violation>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn requires_failure(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.action == SuggestedAction::FailRun)
    }

    pub fn sections_to_regenerate(&self) -> BTreeSet<SectionIndex> {
        self.violations
            .iter()
            .filter(|v| v.action == SuggestedAction::RegenerateSection)
            .filter_map(|v| v.section_index)
            .collect()
    }

    fn push(
        &mut self,
        section_index: Option<SectionIndex>,
        kind: ViolationKind,
        action: SuggestedAction,
        detail: String,
    ) {
        self.violations.push(Violation {
            section_index,
            kind,
            action,
            detail,
        });
    }
}

const STOPWORDS: &[&str] = &[
    "about", "also", "and", "been", "being", "from", "have", "into", "more", "most", "other",
    "over", "part", "section", "some", "such", "than", "that", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "very", "what", "when", "where", "which",
    "while", "with", "will", "your",
];

#[derive(Debug, Clone, Default)]
pub struct ConsistencyManager {
    config: ConsistencyConfig,
}

impl ConsistencyManager {
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    /// Full review: count, emptiness, placeholder ratio and cross-section signals
    pub fn review(&self, outline: &Outline, artifacts: &[SectionArtifact]) -> ConsistencyReport {
        self.review_partial(outline, artifacts, &BTreeSet::new())
    }

    /// Full review of a degraded run. Sections in `failed` may be missing
    /// without counting as a mismatch; every other check still applies.
    pub fn review_partial(
        &self,
        outline: &Outline,
        artifacts: &[SectionArtifact],
        failed: &BTreeSet<SectionIndex>,
    ) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        self.check_count(outline, artifacts, failed, &mut report);
        self.check_placeholder_ratio(outline, artifacts, &mut report);
        let scope: BTreeSet<SectionIndex> = artifacts.iter().map(|a| a.section_index).collect();
        self.check_sections(outline, artifacts, &scope, &mut report);
        report
    }

    /// Review limited to `section_index` and its immediate neighbours
    pub fn review_scoped(
        &self,
        outline: &Outline,
        artifacts: &[SectionArtifact],
        section_index: SectionIndex,
    ) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let scope: BTreeSet<SectionIndex> = (section_index.saturating_sub(1)..=section_index + 1)
            .filter(|i| artifacts.iter().any(|a| a.section_index == *i))
            .collect();
        self.check_sections(outline, artifacts, &scope, &mut report);
        report
    }

    fn check_count(
        &self,
        outline: &Outline,
        artifacts: &[SectionArtifact],
        failed: &BTreeSet<SectionIndex>,
        report: &mut ConsistencyReport,
    ) {
        let unaccounted = outline
            .sections
            .iter()
            .filter(|spec| {
                !failed.contains(&spec.index)
                    && !artifacts.iter().any(|a| a.section_index == spec.index)
            })
            .count();
        if unaccounted > 0 || artifacts.len() > outline.len() {
            report.push(
                None,
                ViolationKind::SectionCountMismatch,
                SuggestedAction::FailRun,
                format!(
                    "{} artifacts and {} failed sections for an outline of {} sections",
                    artifacts.len(),
                    failed.len(),
                    outline.len()
                ),
            );
        }
        for artifact in artifacts {
            if outline.section(artifact.section_index).is_none() {
                report.push(
                    Some(artifact.section_index),
                    ViolationKind::SectionCountMismatch,
                    SuggestedAction::FailRun,
                    "artifact has no outline section".to_string(),
                );
            }
        }
    }

    fn check_placeholder_ratio(
        &self,
        outline: &Outline,
        artifacts: &[SectionArtifact],
        report: &mut ConsistencyReport,
    ) {
        if outline.is_empty() {
            return;
        }
        let placeholders = artifacts.iter().filter(|a| a.has_placeholder()).count();
        let ratio = placeholders as f64 / outline.len() as f64;
        if ratio > self.config.max_placeholder_ratio {
            report.push(
                None,
                ViolationKind::PlaceholderRatioExceeded,
                SuggestedAction::FailRun,
                format!(
                    "{} of {} sections use placeholder content (limit {:.0}%)",
                    placeholders,
                    outline.len(),
                    self.config.max_placeholder_ratio * 100.0
                ),
            );
        }
    }

    fn check_sections(
        &self,
        outline: &Outline,
        artifacts: &[SectionArtifact],
        scope: &BTreeSet<SectionIndex>,
        report: &mut ConsistencyReport,
    ) {
        let run_terms = self.run_terms(outline);
        let median_tone = median(
            artifacts
                .iter()
                .filter(|a| !a.is_text_empty())
                .map(|a| tone_density(a.body()))
                .collect(),
        );
        let scored_sections = artifacts.iter().filter(|a| !a.is_text_empty()).count();

        let mut title_owner: HashMap<String, SectionIndex> = HashMap::new();
        let mut sorted: Vec<&SectionArtifact> = artifacts.iter().collect();
        sorted.sort_by_key(|a| a.section_index);
        let mut duplicates: BTreeMap<SectionIndex, SectionIndex> = BTreeMap::new();
        for artifact in &sorted {
            let key = normalize_title(&artifact.title);
            match title_owner.get(&key) {
                Some(first) => {
                    duplicates.insert(artifact.section_index, *first);
                }
                None => {
                    title_owner.insert(key, artifact.section_index);
                }
            }
        }

        for artifact in sorted.into_iter().filter(|a| scope.contains(&a.section_index)) {
            let index = artifact.section_index;

            if artifact.is_text_empty() {
                report.push(
                    Some(index),
                    ViolationKind::EmptySection,
                    SuggestedAction::RegenerateSection,
                    "section text is empty".to_string(),
                );
            } else if let Some(spec) = outline.section(index) {
                let mut own = self.terms(&spec.title);
                for point in &spec.key_points {
                    own.extend(self.terms(point));
                }
                let own_run_terms: BTreeSet<&String> = own.intersection(&run_terms).collect();
                let body_terms = self.terms(artifact.body());
                if !own_run_terms.is_empty() && body_terms.is_disjoint(&run_terms) {
                    report.push(
                        Some(index),
                        ViolationKind::TerminologyDrift,
                        SuggestedAction::RegenerateSection,
                        format!(
                            "body uses none of the run's key terms ({})",
                            own_run_terms
                                .iter()
                                .map(|t| t.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    );
                }
            }

            if artifact.has_placeholder() {
                report.push(
                    Some(index),
                    ViolationKind::PlaceholderContent,
                    SuggestedAction::AcceptAsIs,
                    "section carries placeholder content".to_string(),
                );
            }

            if let Some(first) = duplicates.get(&index) {
                report.push(
                    Some(index),
                    ViolationKind::DuplicateTitle,
                    SuggestedAction::AcceptAsIs,
                    format!("title repeats section {}", first),
                );
            }

            if scored_sections >= 3 && !artifact.is_text_empty() {
                let density = tone_density(artifact.body());
                if density > median_tone + self.config.tone_outlier_threshold {
                    report.push(
                        Some(index),
                        ViolationKind::ToneMismatch,
                        SuggestedAction::AcceptAsIs,
                        format!(
                            "{:.1} tone markers per 100 words against a run median of {:.1}",
                            density, median_tone
                        ),
                    );
                }
            }
        }
    }

    /// Terms that appear in the outline entries of at least two sections
    fn run_terms(&self, outline: &Outline) -> BTreeSet<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for spec in &outline.sections {
            let mut terms = self.terms(&spec.title);
            for point in &spec.key_points {
                terms.extend(self.terms(point));
            }
            for term in terms {
                *counts.entry(term).or_default() += 1;
            }
        }
        let min_sections = if outline.len() >= 2 { 2 } else { 1 };
        counts
            .into_iter()
            .filter(|(_, n)| *n >= min_sections)
            .map(|(term, _)| term)
            .collect()
    }

    fn terms(&self, text: &str) -> BTreeSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= self.config.min_term_len)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect()
    }
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Exclamation and question marks per 100 words
fn tone_density(body: &str) -> f64 {
    let words = body.split_whitespace().count().max(1);
    let marks = body.chars().filter(|c| *c == '!' || *c == '?').count();
    marks as f64 * 100.0 / words as f64
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
