//! Report Assembler: aggregates a run into a [`RunReport`] and writes its
//! artifacts to the run directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::analysis::readable_text;
use crate::error::MatlitError;
use crate::layout::{
    ANALYSIS_FILE, MATERIAL_INFO_FILE, PAPERS_FILE, RUN_STATS_FILE, RunDirectory, SCREENING_FILE,
    SUMMARY_FILE,
};
use crate::types::{
    AcquisitionResult, AcquisitionStatus, AnalysisResult, AnalysisStatus, AttemptOutcome,
    FullTextChannel, MaterialRecord, PaperAnalysis, PaperCandidate, RelevanceVerdict, ReportEntry,
    RunReport, RunSummary, VerdictOrigin,
};

pub const PAPERS_COLUMNS: &[&str] = &[
    "rank",
    "paper_id",
    "title",
    "authors",
    "venue",
    "year",
    "doi",
    "citation_count",
    "publisher",
    "abstract",
];

pub const SCREENING_COLUMNS: &[&str] = &[
    "rank",
    "paper_id",
    "title",
    "evaluated",
    "relevant",
    "score",
    "verdict_origin",
    "rationale",
    "acquisition_status",
    "acquisition_source",
    "pdf_file",
    "pdf_bytes",
    "analysis_status",
];

pub const ANALYSIS_COLUMNS: &[&str] = &[
    "rank",
    "paper_id",
    "title",
    "doi",
    "research_background",
    "innovation_points",
    "preparation_conditions",
    "characterization_results",
    "conclusions",
    "analyzed_at",
];

/// Status written for accepted-but-never-acquired and unaccepted candidates.
pub const NOT_PURSUED: &str = "not-pursued";

/// Everything the assembler needs from a finished run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub target_count: usize,
    pub institutional_access: bool,
    pub material: MaterialRecord,
    pub candidates: Vec<PaperCandidate>,
    /// Index-aligned with `candidates`.
    pub verdicts: Vec<Option<RelevanceVerdict>>,
    pub acquisitions: Vec<AcquisitionResult>,
    pub analyses: Vec<AnalysisResult>,
    pub search_error: Option<String>,
    pub supplement_rounds: usize,
}

pub struct ReportAssembler;

impl ReportAssembler {
    /// Combine the stage outputs into one report, in search order.
    pub fn assemble(inputs: RunInputs, finished_at: DateTime<Utc>) -> RunReport {
        let mut acquisitions: HashMap<String, AcquisitionResult> = inputs
            .acquisitions
            .into_iter()
            .map(|a| (a.paper_id.clone(), a))
            .collect();
        let mut analyses: HashMap<String, AnalysisResult> = inputs
            .analyses
            .into_iter()
            .map(|a| (a.paper_id.clone(), a))
            .collect();
        let mut verdicts = inputs.verdicts.into_iter();

        let entries: Vec<ReportEntry> = inputs
            .candidates
            .into_iter()
            .map(|candidate| {
                let verdict = verdicts.next().flatten();
                let acquisition = acquisitions.remove(&candidate.paper_id);
                let analysis = analyses.remove(&candidate.paper_id);
                ReportEntry {
                    candidate,
                    verdict,
                    acquisition,
                    analysis,
                }
            })
            .collect();

        let mut summary = Self::summarize(&entries);
        summary.supplement_rounds = inputs.supplement_rounds;
        RunReport {
            run_id: inputs.run_id,
            started_at: inputs.started_at,
            finished_at,
            target_count: inputs.target_count,
            institutional_access: inputs.institutional_access,
            material: inputs.material,
            search_error: inputs.search_error,
            entries,
            summary,
        }
    }

    pub fn summarize(entries: &[ReportEntry]) -> RunSummary {
        let mut summary = RunSummary {
            candidates: entries.len(),
            ..Default::default()
        };

        for entry in entries {
            if let Some(verdict) = &entry.verdict {
                summary.evaluated += 1;
                if verdict.relevant {
                    summary.accepted += 1;
                } else {
                    summary.rejected += 1;
                }
                match verdict.origin {
                    VerdictOrigin::Unparsable => summary.unparsable_verdicts += 1,
                    VerdictOrigin::CallFailed => summary.failed_classifications += 1,
                    VerdictOrigin::Model => {}
                }
            }

            if let Some(analysis) = &entry.analysis {
                match analysis.status {
                    AnalysisStatus::Completed => {
                        summary.analysis_attempts += 1;
                        summary.analysis_successes += 1;
                    }
                    AnalysisStatus::Failed => summary.analysis_attempts += 1,
                    AnalysisStatus::Skipped => {}
                }
            }

            let Some(acq) = &entry.acquisition else {
                continue;
            };
            summary.pursued += 1;
            match acq.status {
                AcquisitionStatus::Acquired => {
                    summary.acquired += 1;
                    match acq.source {
                        Some(FullTextChannel::Publisher) => summary.acquired_publisher += 1,
                        Some(FullTextChannel::ShadowLibrary) => summary.acquired_shadow += 1,
                        None => {}
                    }
                }
                AcquisitionStatus::Denied => summary.denied += 1,
                AcquisitionStatus::NotFound => summary.not_found += 1,
                AcquisitionStatus::Error => summary.errors += 1,
            }
            for attempt in &acq.attempts {
                let retrieved = attempt.outcome == AttemptOutcome::Retrieved;
                match attempt.channel {
                    FullTextChannel::Publisher => {
                        summary.publisher_attempts += 1;
                        summary.publisher_successes += usize::from(retrieved);
                    }
                    FullTextChannel::ShadowLibrary => {
                        summary.shadow_attempts += 1;
                        summary.shadow_successes += usize::from(retrieved);
                    }
                }
            }
        }
        summary
    }

    /// Human-readable summary of a run.
    pub fn narrative(report: &RunReport) -> String {
        let m = &report.material;
        let s = &report.summary;
        let mut out = String::new();

        let _ = writeln!(out, "MATERIALS LITERATURE RUN SUMMARY");
        let _ = writeln!(out, "================================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Run ID:        {}", report.run_id);
        let _ = writeln!(out, "Started:       {}", report.started_at.to_rfc3339());
        let _ = writeln!(out, "Finished:      {}", report.finished_at.to_rfc3339());
        let _ = writeln!(
            out,
            "Access mode:   {}",
            if report.institutional_access {
                "institutional network (publisher first)"
            } else {
                "external network (shadow library only)"
            }
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "MATERIAL");
        let _ = writeln!(out, "--------");
        let _ = writeln!(out, "ID:            {}", m.material_id);
        let _ = writeln!(out, "Formula:       {}", m.formula);
        if !m.elements.is_empty() {
            let _ = writeln!(out, "Elements:      {}", m.elements.join(", "));
        }
        if let Some(cs) = &m.crystal_system {
            let _ = writeln!(out, "Crystal:       {cs}");
        }
        if let Some(sg) = &m.space_group {
            let _ = writeln!(out, "Space group:   {sg}");
        }
        if let Some(gap) = m.band_gap {
            let _ = writeln!(out, "Band gap:      {gap:.3} eV");
        }
        if let Some(e) = m.formation_energy_per_atom {
            let _ = writeln!(out, "Formation E:   {e:.3} eV/atom");
        }
        if let Some(d) = m.density {
            let _ = writeln!(out, "Density:       {d:.3} g/cm^3");
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "PIPELINE");
        let _ = writeln!(out, "--------");
        let _ = writeln!(out, "Target papers:       {}", report.target_count);
        let _ = writeln!(out, "Candidates found:    {}", s.candidates);
        let _ = writeln!(out, "Evaluated:           {}", s.evaluated);
        let _ = writeln!(
            out,
            "Accepted:            {} (rejected {}, unparsable {}, failed {})",
            s.accepted, s.rejected, s.unparsable_verdicts, s.failed_classifications
        );
        let _ = writeln!(
            out,
            "Acquired:            {} of {} (publisher {}, shadow library {})",
            s.acquired, s.pursued, s.acquired_publisher, s.acquired_shadow
        );
        let _ = writeln!(
            out,
            "Not acquired:        denied {}, not found {}, error {}",
            s.denied, s.not_found, s.errors
        );
        let _ = writeln!(out, "Attempt success:     {:.1}%", s.success_rate());
        let _ = writeln!(
            out,
            "Analysed:            {} of {} attempted",
            s.analysis_successes, s.analysis_attempts
        );
        if s.supplement_rounds > 0 {
            let _ = writeln!(out, "Supplement rounds:   {}", s.supplement_rounds);
        }
        if let Some(error) = &report.search_error {
            let _ = writeln!(out, "Note: the paper search failed: {error}");
        }
        if s.accepted < report.target_count {
            let _ = writeln!(
                out,
                "Note: only {} of the {} requested papers were judged relevant.",
                s.accepted, report.target_count
            );
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "ACCEPTED PAPERS");
        let _ = writeln!(out, "---------------");
        let accepted: Vec<&ReportEntry> = report
            .entries
            .iter()
            .filter(|e| e.verdict.as_ref().is_some_and(|v| v.relevant))
            .collect();
        if accepted.is_empty() {
            let _ = writeln!(out, "(none)");
        }
        for entry in accepted {
            let c = &entry.candidate;
            let _ = writeln!(out, "{:02}. {}", c.rank, c.title);
            let meta: Vec<String> = [
                c.year.map(|y| y.to_string()),
                c.venue.clone(),
                c.doi.as_ref().map(|d| format!("doi:{d}")),
            ]
            .into_iter()
            .flatten()
            .collect();
            if !meta.is_empty() {
                let _ = writeln!(out, "    {}", meta.join(" | "));
            }
            if let Some(v) = &entry.verdict {
                let score = v.score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".into());
                let _ = writeln!(out, "    score {score}: {}", v.rationale);
            }
            let status = match &entry.acquisition {
                Some(acq) => match (&acq.status, &acq.file_path) {
                    (AcquisitionStatus::Acquired, Some(path)) => format!(
                        "acquired via {} -> {}",
                        acq.source.map(|s| s.to_string()).unwrap_or_default(),
                        file_name(path)
                    ),
                    (status, _) => status.to_string(),
                },
                None => NOT_PURSUED.to_string(),
            };
            let _ = writeln!(out, "    full text: {status}");
            if let Some(analysis) = &entry.analysis {
                let _ = writeln!(out, "    analysis: {}", analysis.status);
            }
        }
        out
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One row of `papers.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRow {
    pub rank: usize,
    pub paper_id: String,
    pub title: String,
    pub authors: String,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
    pub citation_count: Option<u64>,
    pub publisher: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
}

impl From<&PaperCandidate> for PaperRow {
    fn from(c: &PaperCandidate) -> Self {
        Self {
            rank: c.rank,
            paper_id: c.paper_id.clone(),
            title: c.title.clone(),
            authors: c.authors.join("; "),
            venue: c.venue.clone(),
            year: c.year,
            doi: c.doi.clone(),
            citation_count: c.citation_count,
            publisher: c.publisher_kind().to_string(),
            abstract_text: c.abstract_text.clone(),
        }
    }
}

/// One row of `screening.csv`: verdict and acquisition outcome per candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningRow {
    pub rank: usize,
    pub paper_id: String,
    pub title: String,
    pub evaluated: bool,
    pub relevant: Option<bool>,
    pub score: Option<f32>,
    pub verdict_origin: Option<VerdictOrigin>,
    pub rationale: Option<String>,
    pub acquisition_status: String,
    pub acquisition_source: Option<FullTextChannel>,
    pub pdf_file: Option<String>,
    pub pdf_bytes: Option<u64>,
    pub analysis_status: Option<AnalysisStatus>,
}

impl From<&ReportEntry> for ScreeningRow {
    fn from(entry: &ReportEntry) -> Self {
        let c = &entry.candidate;
        let v = entry.verdict.as_ref();
        let a = entry.acquisition.as_ref();
        Self {
            rank: c.rank,
            paper_id: c.paper_id.clone(),
            title: c.title.clone(),
            evaluated: v.is_some(),
            relevant: v.map(|v| v.relevant),
            score: v.and_then(|v| v.score),
            verdict_origin: v.map(|v| v.origin),
            rationale: v.map(|v| v.rationale.clone()).filter(|r| !r.is_empty()),
            acquisition_status: a
                .map(|a| a.status.to_string())
                .unwrap_or_else(|| NOT_PURSUED.to_string()),
            acquisition_source: a.and_then(|a| a.source),
            pdf_file: a.and_then(|a| a.file_path.as_deref()).map(file_name),
            pdf_bytes: a.filter(|a| a.status == AcquisitionStatus::Acquired).map(|a| a.bytes),
            analysis_status: entry.analysis.as_ref().map(|a| a.status),
        }
    }
}

/// One row of `analysis.csv`, written for every completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRow {
    pub rank: usize,
    pub paper_id: String,
    pub title: String,
    pub doi: Option<String>,
    pub research_background: String,
    pub innovation_points: String,
    pub preparation_conditions: String,
    pub characterization_results: String,
    pub conclusions: String,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisRow {
    fn new(candidate: &PaperCandidate, analysis: &PaperAnalysis, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            rank: candidate.rank,
            paper_id: candidate.paper_id.clone(),
            title: candidate.title.clone(),
            doi: candidate.doi.clone(),
            research_background: analysis.research_background.clone(),
            innovation_points: analysis.innovation_points.clone(),
            preparation_conditions: analysis.preparation_conditions.clone(),
            characterization_results: analysis.characterization_results.clone(),
            conclusions: analysis.conclusions.clone(),
            analyzed_at,
        }
    }
}

/// Completed analyses of a report, in search order.
pub fn completed_analyses(
    report: &RunReport,
) -> impl Iterator<Item = (&PaperCandidate, &PaperAnalysis, DateTime<Utc>)> {
    report.entries.iter().filter_map(|entry| {
        let result = entry.analysis.as_ref()?;
        let analysis = result.analysis.as_ref()?;
        (result.status == AnalysisStatus::Completed)
            .then_some((&entry.candidate, analysis, result.analyzed_at))
    })
}

/// Contents of `run_stats.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub material_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub target_count: usize,
    pub institutional_access: bool,
    pub success_rate_percent: f64,
    #[serde(flatten)]
    pub summary: RunSummary,
}

impl From<&RunReport> for RunStats {
    fn from(report: &RunReport) -> Self {
        let duration = report.finished_at - report.started_at;
        Self {
            run_id: report.run_id,
            material_id: report.material.material_id.to_string(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            target_count: report.target_count,
            institutional_access: report.institutional_access,
            success_rate_percent: report.summary.success_rate(),
            summary: report.summary.clone(),
        }
    }
}

/// Writes a [`RunReport`]'s artifacts.
pub struct ReportWriter;

impl ReportWriter {
    /// Write every artifact. `summary_report.txt` is always written last, so
    /// its presence means the run completed.
    pub fn write(report: &RunReport, run: &RunDirectory) -> Result<Vec<PathBuf>, MatlitError> {
        let mut written = Vec::new();

        let material_path = run.file(MATERIAL_INFO_FILE);
        std::fs::write(&material_path, serde_json::to_string_pretty(&report.material)?)?;
        written.push(material_path);

        let papers_path = run.file(PAPERS_FILE);
        let papers: Vec<PaperRow> = report
            .entries
            .iter()
            .map(|e| PaperRow::from(&e.candidate))
            .collect();
        write_csv(&papers_path, PAPERS_COLUMNS, &papers)?;
        written.push(papers_path);

        let screening_path = run.file(SCREENING_FILE);
        let screening: Vec<ScreeningRow> = report.entries.iter().map(ScreeningRow::from).collect();
        write_csv(&screening_path, SCREENING_COLUMNS, &screening)?;
        written.push(screening_path);

        let analysis_path = run.file(ANALYSIS_FILE);
        let analysis: Vec<AnalysisRow> = completed_analyses(report)
            .map(|(candidate, analysis, at)| AnalysisRow::new(candidate, analysis, at))
            .collect();
        write_csv(&analysis_path, ANALYSIS_COLUMNS, &analysis)?;
        written.push(analysis_path);

        for (candidate, analysis, at) in completed_analyses(report) {
            let path = run.analysis_path(candidate);
            std::fs::write(&path, readable_text(candidate, analysis, at))?;
            written.push(path);
        }

        let stats_path = run.file(RUN_STATS_FILE);
        std::fs::write(
            &stats_path,
            serde_json::to_string_pretty(&RunStats::from(report))?,
        )?;
        written.push(stats_path);

        let summary_path = run.file(SUMMARY_FILE);
        std::fs::write(&summary_path, ReportAssembler::narrative(report))?;
        written.push(summary_path);

        info!(dir = %run.root().display(), files = written.len(), "Report written");
        Ok(written)
    }
}

fn write_csv<T: Serialize>(path: &Path, columns: &[&str], rows: &[T]) -> Result<(), MatlitError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(columns)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Parse a `screening.csv` file back into rows.
pub fn read_screening_table(path: &Path) -> Result<Vec<ScreeningRow>, MatlitError> {
    read_csv(path)
}

/// Parse an `analysis.csv` file back into rows.
pub fn read_analysis_table(path: &Path) -> Result<Vec<AnalysisRow>, MatlitError> {
    read_csv(path)
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, MatlitError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptRecord, MaterialId};
    use chrono::Local;
    use pretty_assertions::assert_eq;

    fn paper(i: usize) -> PaperCandidate {
        let mut p = PaperCandidate::new(format!("p{i}"), format!("Paper, \"quoted\" {i}"))
            .with_doi(format!("10.1016/j.{i}"))
            .with_abstract("Line one\nline two");
        p.rank = i;
        p.authors = vec!["A. Author".into(), "B. Author".into()];
        p.year = Some(2020);
        p
    }

    fn verdict(relevant: bool) -> RelevanceVerdict {
        RelevanceVerdict {
            relevant,
            score: Some(if relevant { 8.5 } else { 2.0 }),
            rationale: "because, reasons".into(),
            origin: VerdictOrigin::Model,
        }
    }

    fn sample_report(run: &RunDirectory) -> RunReport {
        let started = Utc::now();
        let acquired_path = run.pdf_path(&paper(1));
        let inputs = RunInputs {
            run_id: Uuid::new_v4(),
            started_at: started,
            target_count: 2,
            institutional_access: true,
            material: MaterialRecord::new(MaterialId::parse("mp-20738").unwrap(), "YFeO3"),
            candidates: vec![paper(1), paper(2), paper(3), paper(4)],
            verdicts: vec![Some(verdict(true)), Some(verdict(false)), Some(verdict(true)), None],
            acquisitions: vec![
                AcquisitionResult {
                    paper_id: "p3".into(),
                    status: AcquisitionStatus::Denied,
                    source: None,
                    file_path: None,
                    bytes: 0,
                    attempts: vec![
                        AttemptRecord {
                            channel: FullTextChannel::Publisher,
                            outcome: AttemptOutcome::NotAvailable,
                            detail: None,
                        },
                        AttemptRecord {
                            channel: FullTextChannel::ShadowLibrary,
                            outcome: AttemptOutcome::NotAvailable,
                            detail: None,
                        },
                    ],
                },
                AcquisitionResult {
                    paper_id: "p1".into(),
                    status: AcquisitionStatus::Acquired,
                    source: Some(FullTextChannel::Publisher),
                    file_path: Some(acquired_path),
                    bytes: 4096,
                    attempts: vec![AttemptRecord {
                        channel: FullTextChannel::Publisher,
                        outcome: AttemptOutcome::Retrieved,
                        detail: None,
                    }],
                },
            ],
            analyses: vec![AnalysisResult {
                paper_id: "p1".into(),
                status: AnalysisStatus::Completed,
                analysis: Some(PaperAnalysis {
                    research_background: "Orthoferrites, briefly".into(),
                    innovation_points: "A new route".into(),
                    preparation_conditions: "800 C\n2 h".into(),
                    characterization_results: "XRD".into(),
                    conclusions: "It works".into(),
                }),
                detail: None,
                analyzed_at: started,
            }],
            search_error: None,
            supplement_rounds: 0,
        };
        ReportAssembler::assemble(inputs, started + chrono::Duration::seconds(3))
    }

    #[test]
    fn test_assemble_keeps_search_order_and_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), &MaterialId::parse("1").unwrap(), Local::now())
            .unwrap();
        let report = sample_report(&run);

        let ids: Vec<_> = report.entries.iter().map(|e| e.candidate.paper_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3", "p4"]);
        assert!(report.entries[0].acquisition.is_some());
        assert!(report.entries[1].acquisition.is_none());
        assert!(report.entries[3].verdict.is_none());

        let s = &report.summary;
        assert_eq!(s.candidates, 4);
        assert_eq!(s.evaluated, 3);
        assert_eq!(s.accepted, 2);
        assert_eq!(s.rejected, 1);
        assert_eq!(s.pursued, 2);
        assert_eq!(s.acquired_publisher, 1);
        assert_eq!(s.denied, 1);
        assert_eq!(s.publisher_attempts, 2);
        assert_eq!(s.shadow_attempts, 1);
        assert_eq!(s.analysis_attempts, 1);
        assert_eq!(s.analysis_successes, 1);
        assert!(report.entries[0].analysis.is_some());
        assert!(report.entries[2].analysis.is_none());
    }

    #[test]
    fn test_written_screening_table_reads_back() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), &MaterialId::parse("1").unwrap(), Local::now())
            .unwrap();
        let report = sample_report(&run);
        let written = ReportWriter::write(&report, &run).unwrap();
        assert_eq!(written.last().unwrap(), &run.file(SUMMARY_FILE));

        let rows = read_screening_table(&run.file(SCREENING_FILE)).unwrap();
        let expected: Vec<ScreeningRow> = report.entries.iter().map(ScreeningRow::from).collect();
        assert_eq!(rows, expected);

        assert_eq!(rows[0].acquisition_status, "acquired");
        assert_eq!(rows[0].analysis_status, Some(AnalysisStatus::Completed));
        assert_eq!(rows[2].analysis_status, None);
        assert_eq!(rows[0].pdf_file.as_deref(), Some("paper_01_Paper,__quoted__1.pdf"));
        assert_eq!(rows[1].acquisition_status, NOT_PURSUED);
        assert_eq!(rows[2].acquisition_status, "denied");
        assert!(!rows[3].evaluated);
        assert_eq!(rows[3].relevant, None);
    }

    #[test]
    fn test_csv_headers_match_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), &MaterialId::parse("1").unwrap(), Local::now())
            .unwrap();
        let report = sample_report(&run);
        ReportWriter::write(&report, &run).unwrap();

        let papers = std::fs::read_to_string(run.file(PAPERS_FILE)).unwrap();
        assert_eq!(papers.lines().next().unwrap(), PAPERS_COLUMNS.join(","));
        assert!(papers.contains("A. Author; B. Author"));
        assert!(papers.contains("elsevier"));

        let screening = std::fs::read_to_string(run.file(SCREENING_FILE)).unwrap();
        assert_eq!(screening.lines().next().unwrap(), SCREENING_COLUMNS.join(","));

        let analysis = std::fs::read_to_string(run.file(ANALYSIS_FILE)).unwrap();
        assert_eq!(analysis.lines().next().unwrap(), ANALYSIS_COLUMNS.join(","));
    }

    #[test]
    fn test_empty_report_still_writes_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), &MaterialId::parse("1").unwrap(), Local::now())
            .unwrap();
        let now = Utc::now();
        let report = ReportAssembler::assemble(
            RunInputs {
                run_id: Uuid::new_v4(),
                started_at: now,
                target_count: 3,
                institutional_access: false,
                material: MaterialRecord::new(MaterialId::parse("1").unwrap(), "Fe"),
                candidates: vec![],
                verdicts: vec![],
                acquisitions: vec![],
                analyses: vec![],
                search_error: Some("paper_search: request rejected".into()),
                supplement_rounds: 0,
            },
            now,
        );
        ReportWriter::write(&report, &run).unwrap();
        assert!(read_screening_table(&run.file(SCREENING_FILE)).unwrap().is_empty());
        assert!(read_analysis_table(&run.file(ANALYSIS_FILE)).unwrap().is_empty());
        let summary = std::fs::read_to_string(run.file(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("(none)"));
        assert!(summary.contains("only 0 of the 3 requested papers"));
        assert!(summary.contains("the paper search failed: paper_search: request rejected"));
    }

    #[test]
    fn test_run_stats_json() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), &MaterialId::parse("1").unwrap(), Local::now())
            .unwrap();
        let report = sample_report(&run);
        ReportWriter::write(&report, &run).unwrap();
        let raw = std::fs::read_to_string(run.file(RUN_STATS_FILE)).unwrap();
        let stats: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stats["material_id"], "mp-20738");
        assert_eq!(stats["acquired"], 1);
        assert_eq!(stats["duration_secs"], 3.0);
        assert_eq!(stats["analysis_attempts"], 1);
        assert_eq!(stats["analysis_successes"], 1);
    }

    #[test]
    fn test_completed_analysis_is_written_as_table_and_text() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::create(tmp.path(), &MaterialId::parse("1").unwrap(), Local::now())
            .unwrap();
        let report = sample_report(&run);
        let written = ReportWriter::write(&report, &run).unwrap();

        let rows = read_analysis_table(&run.file(ANALYSIS_FILE)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].paper_id, "p1");
        assert_eq!(rows[0].doi.as_deref(), Some("10.1016/j.1"));
        assert_eq!(rows[0].preparation_conditions, "800 C\n2 h");
        assert_eq!(rows[0].analyzed_at, report.started_at);

        let text_path = run.analysis_path(&report.entries[0].candidate);
        assert!(written.contains(&text_path));
        let text = std::fs::read_to_string(&text_path).unwrap();
        assert!(text.starts_with("Paper Title: Paper, \"quoted\" 1\n"));
        assert!(text.contains("It works"));
        assert_eq!(std::fs::read_dir(run.analysis_dir()).unwrap().count(), 1);
    }
}
