//! Content Analyzer: sends each acquired PDF to a language model and splits
//! the answer into background, innovations, preparation, characterization
//! and conclusions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::error::{ApiError, MatlitError};
use crate::retry::RetryPolicy;
use crate::types::{AnalysisResult, AnalysisStatus, MaterialRecord, PaperAnalysis, PaperCandidate};

/// A single analysis call: the prompt plus the raw PDF bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub paper_id: String,
    pub prompt: String,
    pub pdf: Vec<u8>,
}

/// A language model that reads a PDF and answers with raw text.
#[async_trait]
pub trait PdfAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ApiError>;
}

/// Written for a section the model left empty.
pub const MISSING_SECTION: &str = "Information not available";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Background,
    Innovation,
    Preparation,
    Characterization,
    Conclusions,
}

impl Section {
    fn from_heading(heading: &str) -> Option<Self> {
        let h = heading.trim().trim_matches('*').trim().to_ascii_lowercase();
        if h.starts_with("research background") || h.starts_with("background") {
            Some(Section::Background)
        } else if h.starts_with("research innovation") || h.starts_with("innovation") {
            Some(Section::Innovation)
        } else if h.starts_with("preparation") || h.starts_with("synthesis") {
            Some(Section::Preparation)
        } else if h.starts_with("characterization") || h.starts_with("characterisation") {
            Some(Section::Characterization)
        } else if h.starts_with("conclusion") {
            Some(Section::Conclusions)
        } else {
            None
        }
    }

    fn slot(self, analysis: &mut PaperAnalysis) -> &mut String {
        match self {
            Section::Background => &mut analysis.research_background,
            Section::Innovation => &mut analysis.innovation_points,
            Section::Preparation => &mut analysis.preparation_conditions,
            Section::Characterization => &mut analysis.characterization_results,
            Section::Conclusions => &mut analysis.conclusions,
        }
    }
}

/// Build the analysis prompt for one paper.
pub fn build_analysis_prompt(material: &MaterialRecord, candidate: &PaperCandidate) -> String {
    let formula = &material.formula;
    format!(
        r#"As a senior materials science expert, analyse the attached paper about {formula} ({material}) in detail.

Paper title: {title}

Answer using exactly these Markdown headings:

## Research Background
Research background and significance, one or two paragraphs.

## Research Innovation Points
Main technical innovations and how they differ from existing work.

## Preparation Conditions
Detailed enough to reproduce: raw materials, ratios and purity; temperature, time and atmosphere; equipment and key parameters; post-treatment.

## Characterization Results
Methods used (XRD, SEM, TEM, ...), key data, performance values and structural features.

## Conclusions
The paper's own conclusions, without changing their meaning.

Be specific. If the paper does not describe something, say so explicitly in that section."#,
        material = material.describe(),
        title = candidate.title,
    )
}

/// Split a model answer into sections. Text before the first recognised
/// heading counts as background when no heading is present at all.
/// Returns `None` when the answer has no content.
pub fn parse_analysis(raw: &str) -> Option<PaperAnalysis> {
    let mut analysis = PaperAnalysis::default();
    let mut preamble = String::new();
    let mut current: Option<Section> = None;
    let mut saw_heading = false;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            saw_heading = true;
            current = Section::from_heading(trimmed.trim_start_matches('#'));
            continue;
        }
        let target = match current {
            Some(section) => section.slot(&mut analysis),
            None if !saw_heading => &mut preamble,
            None => continue,
        };
        target.push_str(line);
        target.push('\n');
    }

    for section in [
        Section::Background,
        Section::Innovation,
        Section::Preparation,
        Section::Characterization,
        Section::Conclusions,
    ] {
        let slot = section.slot(&mut analysis);
        *slot = slot.trim().to_string();
    }
    if analysis == PaperAnalysis::default() {
        let preamble = preamble.trim();
        if preamble.is_empty() {
            return None;
        }
        analysis.research_background = preamble.to_string();
    }
    Some(analysis)
}

/// Plain-text rendering written to `analysis/paper_NN_<title>.txt`.
pub fn readable_text(
    candidate: &PaperCandidate,
    analysis: &PaperAnalysis,
    analyzed_at: DateTime<Utc>,
) -> String {
    let or_missing = |text: &str| {
        if text.trim().is_empty() {
            MISSING_SECTION.to_string()
        } else {
            text.to_string()
        }
    };
    let mut out = String::new();
    let _ = writeln!(out, "Paper Title: {}", candidate.title);
    let _ = writeln!(out, "DOI: {}", candidate.doi.as_deref().unwrap_or("N/A"));
    let _ = writeln!(out, "Analysis Time: {}", analyzed_at.to_rfc3339());
    let _ = writeln!(out, "{}", "=".repeat(60));
    for (heading, body) in [
        ("RESEARCH BACKGROUND", &analysis.research_background),
        ("RESEARCH INNOVATION POINTS", &analysis.innovation_points),
        ("PREPARATION CONDITIONS", &analysis.preparation_conditions),
        ("CHARACTERIZATION RESULTS", &analysis.characterization_results),
        ("CONCLUSIONS", &analysis.conclusions),
    ] {
        let _ = writeln!(out);
        let _ = writeln!(out, "{heading}");
        let _ = writeln!(out, "{}", "-".repeat(heading.len()));
        let _ = writeln!(out, "{}", or_missing(body));
    }
    out
}

pub struct ContentAnalyzer {
    analyzer: Arc<dyn PdfAnalyzer>,
    config: AnalysisConfig,
    retry: RetryPolicy,
}

impl ContentAnalyzer {
    pub fn new(analyzer: Arc<dyn PdfAnalyzer>, config: AnalysisConfig, retry: RetryPolicy) -> Self {
        Self {
            analyzer,
            config,
            retry,
        }
    }

    /// Analyse one stored PDF.
    ///
    /// Model failures are recorded in the result; only failing to read the
    /// local file is an error.
    pub async fn analyze(
        &self,
        material: &MaterialRecord,
        candidate: &PaperCandidate,
        pdf_path: &Path,
    ) -> Result<AnalysisResult, MatlitError> {
        let mut result = AnalysisResult {
            paper_id: candidate.paper_id.clone(),
            status: AnalysisStatus::Failed,
            analysis: None,
            detail: None,
            analyzed_at: Utc::now(),
        };

        let size = tokio::fs::metadata(pdf_path).await?.len();
        if size > self.config.max_pdf_bytes {
            debug!(paper_id = %candidate.paper_id, size, "PDF too large to analyse");
            result.status = AnalysisStatus::Skipped;
            result.detail = Some(format!(
                "PDF is {size} bytes, limit is {}",
                self.config.max_pdf_bytes
            ));
            return Ok(result);
        }

        let request = AnalysisRequest {
            paper_id: candidate.paper_id.clone(),
            prompt: build_analysis_prompt(material, candidate),
            pdf: tokio::fs::read(pdf_path).await?,
        };
        let answer = self
            .retry
            .run("pdf_analysis", || self.analyzer.analyze(&request))
            .await;
        result.analyzed_at = Utc::now();

        match answer.map(|raw| parse_analysis(&raw)) {
            Ok(Some(analysis)) => {
                info!(paper_id = %candidate.paper_id, "PDF analysed");
                result.status = AnalysisStatus::Completed;
                result.analysis = Some(analysis);
            }
            Ok(None) => {
                warn!(paper_id = %candidate.paper_id, "Empty analysis answer");
                result.detail = Some("model returned no analysis text".to_string());
            }
            Err(e) => {
                warn!(paper_id = %candidate.paper_id, error = %e, "PDF analysis failed");
                result.detail = Some(e.to_string());
            }
        }
        Ok(result)
    }

    /// Analyse every `(candidate, pdf)` pair with bounded concurrency.
    /// Results keep the input order.
    pub async fn analyze_all(
        &self,
        material: &MaterialRecord,
        papers: &[(PaperCandidate, PathBuf)],
    ) -> Result<Vec<AnalysisResult>, MatlitError> {
        let semaphore = Semaphore::new(self.config.concurrency.max(1));
        let results = join_all(papers.iter().map(|(candidate, path)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.analyze(material, candidate, path).await
            }
        }))
        .await;

        let results: Vec<AnalysisResult> = results.into_iter().collect::<Result<_, _>>()?;
        let completed = results
            .iter()
            .filter(|r| r.status == AnalysisStatus::Completed)
            .count();
        info!(papers = results.len(), completed, "Content analysis complete");
        Ok(results)
    }
}
