//! Fundamental data types shared by every pipeline stage.

use crate::error::MatlitError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical Materials Project identifier, always of the form `mp-<digits>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MaterialId(String);

impl MaterialId {
    /// Normalize user input to the canonical form.
    ///
    /// Accepts `mp-20738`, `MP-20738` and bare `20738`, with surrounding
    /// whitespace. The digits are kept verbatim.
    pub fn parse(input: &str) -> Result<Self, MatlitError> {
        let trimmed = input.trim();
        let digits = match trimmed.get(..3) {
            Some(prefix) if prefix.eq_ignore_ascii_case("mp-") => &trimmed[3..],
            _ => trimmed,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MatlitError::InvalidMaterialId {
                input: input.to_string(),
            });
        }
        Ok(Self(format!("mp-{digits}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric part without the `mp-` prefix.
    pub fn number(&self) -> &str {
        &self.0[3..]
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MaterialId {
    type Err = MatlitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MaterialId {
    type Error = MatlitError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MaterialId> for String {
    fn from(id: MaterialId) -> Self {
        id.0
    }
}

/// Material metadata as returned by the materials database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub material_id: MaterialId,
    pub formula: String,
    /// Element symbol -> amount in the reduced formula.
    #[serde(default)]
    pub composition: BTreeMap<String, f64>,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub crystal_system: Option<String>,
    #[serde(default)]
    pub space_group: Option<String>,
    /// Band gap in eV.
    #[serde(default)]
    pub band_gap: Option<f64>,
    /// Formation energy in eV/atom.
    #[serde(default)]
    pub formation_energy_per_atom: Option<f64>,
    /// Density in g/cm^3.
    #[serde(default)]
    pub density: Option<f64>,
    #[serde(default)]
    pub is_magnetic: Option<bool>,
    #[serde(default)]
    pub theoretical: Option<bool>,
}

impl MaterialRecord {
    /// Minimal record, mostly useful for tests and fakes.
    pub fn new(material_id: MaterialId, formula: impl Into<String>) -> Self {
        Self {
            material_id,
            formula: formula.into(),
            composition: BTreeMap::new(),
            elements: Vec::new(),
            crystal_system: None,
            space_group: None,
            band_gap: None,
            formation_energy_per_atom: None,
            density: None,
            is_magnetic: None,
            theoretical: None,
        }
    }

    /// Search terms for this material: the formula first, then any extra
    /// keywords, deduplicated case-insensitively.
    pub fn search_terms(&self, extra_keywords: &[String]) -> Vec<String> {
        let mut terms: Vec<String> = vec![self.formula.clone()];
        for kw in extra_keywords {
            let kw = kw.trim();
            if !kw.is_empty() && !terms.iter().any(|t| t.eq_ignore_ascii_case(kw)) {
                terms.push(kw.to_string());
            }
        }
        terms
    }

    /// Short human-readable description used in prompts and reports.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("{} ({})", self.formula, self.material_id)];
        if let Some(cs) = &self.crystal_system {
            parts.push(format!("crystal system {cs}"));
        }
        if let Some(sg) = &self.space_group {
            parts.push(format!("space group {sg}"));
        }
        if let Some(gap) = self.band_gap {
            parts.push(format!("band gap {gap:.3} eV"));
        }
        parts.join(", ")
    }
}

/// Which kind of publisher a DOI belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherKind {
    Elsevier,
    Other,
    Unknown,
}

impl fmt::Display for PublisherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublisherKind::Elsevier => write!(f, "elsevier"),
            PublisherKind::Other => write!(f, "other"),
            PublisherKind::Unknown => write!(f, "unknown"),
        }
    }
}

const ELSEVIER_DOI_PREFIXES: &[&str] = &[
    "10.1016/", // Elsevier
    "10.1006/", // Academic Press
    "10.1053/", // W.B. Saunders
    "10.1054/", // Churchill Livingstone
    "10.1078/", // Urban & Fischer
    "10.1529/", // Cell Press / Biophysical Society
];

/// Classify a DOI by registrant prefix.
pub fn classify_doi(doi: Option<&str>) -> PublisherKind {
    match doi.map(str::trim) {
        None | Some("") => PublisherKind::Unknown,
        Some(doi) => {
            let lower = doi.to_ascii_lowercase();
            if ELSEVIER_DOI_PREFIXES.iter().any(|p| lower.starts_with(p)) {
                PublisherKind::Elsevier
            } else {
                PublisherKind::Other
            }
        }
    }
}

/// A paper returned by the scholarly search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperCandidate {
    /// External identifier, used as the deduplication key.
    pub paper_id: String,
    pub title: String,
    #[serde(default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub citation_count: Option<u64>,
    /// 1-based position in search-result order, assigned after deduplication.
    #[serde(default)]
    pub rank: usize,
}

impl PaperCandidate {
    pub fn new(paper_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            paper_id: paper_id.into(),
            title: title.into(),
            abstract_text: None,
            authors: Vec::new(),
            venue: None,
            year: None,
            doi: None,
            citation_count: None,
            rank: 0,
        }
    }

    pub fn with_doi(mut self, doi: impl Into<String>) -> Self {
        self.doi = Some(doi.into());
        self
    }

    pub fn with_abstract(mut self, text: impl Into<String>) -> Self {
        self.abstract_text = Some(text.into());
        self
    }

    pub fn publisher_kind(&self) -> PublisherKind {
        classify_doi(self.doi.as_deref())
    }
}

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOrigin {
    /// The model answered with a well-formed verdict.
    Model,
    /// The model answered, but not in the expected shape.
    Unparsable,
    /// The classification call itself failed.
    CallFailed,
}

impl fmt::Display for VerdictOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictOrigin::Model => write!(f, "model"),
            VerdictOrigin::Unparsable => write!(f, "unparsable"),
            VerdictOrigin::CallFailed => write!(f, "call_failed"),
        }
    }
}

impl FromStr for VerdictOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(VerdictOrigin::Model),
            "unparsable" => Ok(VerdictOrigin::Unparsable),
            "call_failed" => Ok(VerdictOrigin::CallFailed),
            other => Err(format!("unknown verdict origin '{other}'")),
        }
    }
}

/// The relevance filter's decision for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceVerdict {
    pub relevant: bool,
    /// Model score on a 0-10 scale, when provided.
    #[serde(default)]
    pub score: Option<f32>,
    pub rationale: String,
    pub origin: VerdictOrigin,
}

impl RelevanceVerdict {
    pub fn rejected(origin: VerdictOrigin, rationale: impl Into<String>) -> Self {
        Self {
            relevant: false,
            score: None,
            rationale: rationale.into(),
            origin,
        }
    }
}

/// Channel a full text was obtained through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullTextChannel {
    Publisher,
    ShadowLibrary,
}

impl fmt::Display for FullTextChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FullTextChannel::Publisher => write!(f, "publisher"),
            FullTextChannel::ShadowLibrary => write!(f, "shadow_library"),
        }
    }
}

impl FromStr for FullTextChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "publisher" => Ok(FullTextChannel::Publisher),
            "shadow_library" => Ok(FullTextChannel::ShadowLibrary),
            other => Err(format!("unknown channel '{other}'")),
        }
    }
}

/// Final acquisition status of one accepted candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquisitionStatus {
    Acquired,
    Denied,
    NotFound,
    Error,
}

impl AcquisitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionStatus::Acquired => "acquired",
            AcquisitionStatus::Denied => "denied",
            AcquisitionStatus::NotFound => "not-found",
            AcquisitionStatus::Error => "error",
        }
    }
}

impl fmt::Display for AcquisitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acquired" => Ok(AcquisitionStatus::Acquired),
            "denied" => Ok(AcquisitionStatus::Denied),
            "not-found" => Ok(AcquisitionStatus::NotFound),
            "error" => Ok(AcquisitionStatus::Error),
            other => Err(format!("unknown acquisition status '{other}'")),
        }
    }
}

/// Outcome of a single attempt against one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A PDF was obtained.
    Retrieved,
    /// The channel answered that it cannot provide this paper.
    NotAvailable,
    /// The channel could not be reached or kept failing.
    Failed,
}

/// One channel attempt, kept for the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub channel: FullTextChannel,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Result of trying to obtain the full text of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub paper_id: String,
    pub status: AcquisitionStatus,
    #[serde(default)]
    pub source: Option<FullTextChannel>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

/// Outcome of analysing one acquired PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    Failed,
    /// The PDF was not sent, e.g. because it is too large.
    Skipped,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisStatus::Completed => write!(f, "completed"),
            AnalysisStatus::Failed => write!(f, "failed"),
            AnalysisStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Structured reading of one paper's full text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaperAnalysis {
    pub research_background: String,
    pub innovation_points: String,
    pub preparation_conditions: String,
    pub characterization_results: String,
    pub conclusions: String,
}

/// Analysis result for one acquired candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub paper_id: String,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub analysis: Option<PaperAnalysis>,
    #[serde(default)]
    pub detail: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// One row of the run report: a candidate and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub candidate: PaperCandidate,
    /// `None` when the stopping rule ended evaluation before this candidate.
    pub verdict: Option<RelevanceVerdict>,
    /// `None` when the candidate was not pursued for acquisition.
    pub acquisition: Option<AcquisitionResult>,
    /// `None` when no PDF was acquired or analysis is disabled.
    #[serde(default)]
    pub analysis: Option<AnalysisResult>,
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub candidates: usize,
    pub evaluated: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub unparsable_verdicts: usize,
    pub failed_classifications: usize,
    pub pursued: usize,
    pub acquired: usize,
    pub acquired_publisher: usize,
    pub acquired_shadow: usize,
    pub denied: usize,
    pub not_found: usize,
    pub errors: usize,
    pub publisher_attempts: usize,
    pub publisher_successes: usize,
    pub shadow_attempts: usize,
    pub shadow_successes: usize,
    pub analysis_attempts: usize,
    pub analysis_successes: usize,
    /// Extra screening-and-acquisition rounds run to reach the target.
    pub supplement_rounds: usize,
}

impl RunSummary {
    /// Percentage of channel attempts that retrieved a PDF.
    pub fn success_rate(&self) -> f64 {
        let attempts = self.publisher_attempts + self.shadow_attempts;
        if attempts == 0 {
            0.0
        } else {
            (self.publisher_successes + self.shadow_successes) as f64 / attempts as f64 * 100.0
        }
    }
}

/// Everything produced by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target_count: usize,
    pub institutional_access: bool,
    pub material: MaterialRecord,
    /// Set when the paper search failed and the run continued without candidates.
    #[serde(default)]
    pub search_error: Option<String>,
    pub entries: Vec<ReportEntry>,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_id_forms_normalize_identically() {
        let a = MaterialId::parse("mp-20738").unwrap();
        let b = MaterialId::parse("20738").unwrap();
        let c = MaterialId::parse("  MP-20738 \n").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.as_str(), "mp-20738");
        assert_eq!(a.number(), "20738");
    }

    #[test]
    fn test_material_id_rejects_garbage() {
        for bad in ["", "mp-", "mp-12a", "mvc-123", "abc", "mp--1", "-12", "1 2"] {
            assert!(MaterialId::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_material_id_serde_validates() {
        let id: MaterialId = serde_json::from_str("\"149\"").unwrap();
        assert_eq!(id.as_str(), "mp-149");
        assert!(serde_json::from_str::<MaterialId>("\"nope\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"mp-149\"");
    }

    #[test]
    fn test_classify_doi() {
        assert_eq!(
            classify_doi(Some("10.1016/j.jallcom.2020.1")),
            PublisherKind::Elsevier
        );
        assert_eq!(classify_doi(Some("10.1529/biophysj.1")), PublisherKind::Elsevier);
        assert_eq!(classify_doi(Some("10.1038/nature1")), PublisherKind::Other);
        assert_eq!(classify_doi(Some("  ")), PublisherKind::Unknown);
        assert_eq!(classify_doi(None), PublisherKind::Unknown);
    }

    #[test]
    fn test_search_terms_dedup() {
        let record = MaterialRecord::new(MaterialId::parse("1").unwrap(), "YFeO3");
        let terms = record.search_terms(&["yfeo3".into(), "synthesis".into(), " ".into()]);
        assert_eq!(terms, vec!["YFeO3".to_string(), "synthesis".to_string()]);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            AcquisitionStatus::Acquired,
            AcquisitionStatus::Denied,
            AcquisitionStatus::NotFound,
            AcquisitionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<AcquisitionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_success_rate() {
        let summary = RunSummary {
            publisher_attempts: 2,
            publisher_successes: 1,
            shadow_attempts: 2,
            shadow_successes: 2,
            ..Default::default()
        };
        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(RunSummary::default().success_rate(), 0.0);
    }
}
