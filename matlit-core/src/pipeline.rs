//! End-to-end pipeline: resolve, search, filter, acquire, analyse, report.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::acquisition::{FullTextAcquirer, FullTextSource, download_priority};
use crate::analysis::{ContentAnalyzer, PdfAnalyzer};
use crate::config::PipelineConfig;
use crate::error::MatlitError;
use crate::layout::RunDirectory;
use crate::material::{MaterialResolver, MaterialSource};
use crate::relevance::{FilterOutcome, RelevanceClassifier, RelevanceFilter};
use crate::report::{ReportAssembler, ReportWriter, RunInputs};
use crate::retry::RetryPolicy;
use crate::search::{PaperSearchSource, PaperSearcher};
use crate::types::{
    AcquisitionResult, AcquisitionStatus, AnalysisResult, MaterialRecord, PaperCandidate,
    RunReport,
};

/// Current phase of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Resolving,
    Searching,
    Filtering,
    Acquiring,
    Analyzing,
    Reporting,
    Complete,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Resolving => "resolving",
            RunPhase::Searching => "searching",
            RunPhase::Filtering => "filtering",
            RunPhase::Acquiring => "acquiring",
            RunPhase::Analyzing => "analyzing",
            RunPhase::Reporting => "reporting",
            RunPhase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// The external collaborators of a run.
#[derive(Clone)]
pub struct PipelineSources {
    pub materials: Arc<dyn MaterialSource>,
    pub search: Arc<dyn PaperSearchSource>,
    pub classifier: Arc<dyn RelevanceClassifier>,
    pub publisher: Arc<dyn FullTextSource>,
    pub shadow_library: Arc<dyn FullTextSource>,
    pub analyzer: Arc<dyn PdfAnalyzer>,
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    pub run_dir: RunDirectory,
    /// Artifacts in the order they were written.
    pub files: Vec<PathBuf>,
}

/// What the steps before the run directory existed produced.
struct Screened {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    target_count: usize,
    material: MaterialRecord,
    candidates: Vec<PaperCandidate>,
    screening: FilterOutcome,
    search_error: Option<String>,
}

pub struct Pipeline {
    config: PipelineConfig,
    resolver: MaterialResolver,
    searcher: PaperSearcher,
    filter: RelevanceFilter,
    acquirer: Arc<FullTextAcquirer>,
    analyzer: ContentAnalyzer,
    institutional_access: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sources: PipelineSources, institutional_access: bool) -> Self {
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            resolver: MaterialResolver::new(sources.materials, retry.clone()),
            searcher: PaperSearcher::new(sources.search, config.search.clone(), retry.clone()),
            filter: RelevanceFilter::new(sources.classifier, config.relevance.clone(), retry.clone()),
            acquirer: Arc::new(FullTextAcquirer::new(
                sources.publisher,
                sources.shadow_library,
                config.acquisition.clone(),
                retry.clone(),
                institutional_access,
            )),
            analyzer: ContentAnalyzer::new(sources.analyzer, config.analysis.clone(), retry),
            config,
            institutional_access,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the whole pipeline for one material.
    ///
    /// Nothing is written to disk unless the material resolves. A failed
    /// paper search is recorded in the report instead of ending the run.
    /// If a local write fails once the run directory exists, the directory
    /// is removed before the error is returned.
    pub async fn run(&self, raw_material_id: &str, target_count: usize) -> Result<RunOutcome, MatlitError> {
        let run_id = Uuid::new_v4();
        let started_local = Local::now();
        let started_at = started_local.with_timezone(&Utc);
        info!(%run_id, material = raw_material_id, target_count, "Starting run");

        log_phase(RunPhase::Resolving);
        let material = self.resolver.resolve(raw_material_id).await?;

        log_phase(RunPhase::Searching);
        let (candidates, search_error) = match self.searcher.collect(&material, target_count).await {
            Ok(candidates) => (candidates, None),
            Err(MatlitError::Api(e)) => {
                warn!(error = %e, "Paper search failed, continuing without candidates");
                (Vec::new(), Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };
        if candidates.is_empty() && search_error.is_none() {
            warn!(formula = %material.formula, "Search returned no candidates");
        }

        log_phase(RunPhase::Filtering);
        let screening = self.filter.filter(&material, &candidates, target_count).await;
        let accepted = screening.accepted_indices().len();
        if accepted < target_count {
            warn!(accepted, target_count, "Fewer relevant papers than requested");
        }

        let run_dir = {
            let base = self.config.output.base_dir.clone();
            let material_id = material.material_id.clone();
            blocking(move || Ok(RunDirectory::create(&base, &material_id, started_local)?)).await?
        };

        let screened = Screened {
            run_id,
            started_at,
            target_count,
            material,
            candidates,
            screening,
            search_error,
        };
        match self.finish(screened, &run_dir).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(error = %e, "Run failed after its directory was created");
                let incomplete = run_dir.clone();
                // discard logs its own failure
                let _ = blocking(move || {
                    incomplete.discard();
                    Ok(())
                })
                .await;
                Err(e)
            }
        }
    }

    /// Acquire, analyse and write the report into `run_dir`.
    async fn finish(&self, screened: Screened, run_dir: &RunDirectory) -> Result<RunOutcome, MatlitError> {
        let Screened {
            run_id,
            started_at,
            target_count,
            material,
            candidates,
            mut screening,
            search_error,
        } = screened;

        log_phase(RunPhase::Acquiring);
        let (acquisitions, supplement_rounds) = self
            .acquire(&material, &candidates, &mut screening, target_count, run_dir)
            .await?;

        let analyses = self.analyze(&material, &candidates, &acquisitions).await?;

        log_phase(RunPhase::Reporting);
        let report = ReportAssembler::assemble(
            RunInputs {
                run_id,
                started_at,
                target_count,
                institutional_access: self.institutional_access,
                material,
                candidates,
                verdicts: screening.verdicts,
                acquisitions,
                analyses,
                search_error,
                supplement_rounds,
            },
            Utc::now(),
        );
        let run = run_dir.clone();
        let (report, files) = blocking(move || {
            let files = ReportWriter::write(&report, &run)?;
            Ok((report, files))
        })
        .await?;

        log_phase(RunPhase::Complete);
        info!(
            %run_id,
            accepted = report.summary.accepted,
            acquired = report.summary.acquired,
            analysed = report.summary.analysis_successes,
            dir = %run_dir.root().display(),
            "Run complete"
        );
        Ok(RunOutcome {
            report,
            run_dir: run_dir.clone(),
            files,
        })
    }

    /// Pursue the accepted candidates, highest download priority first.
    ///
    /// With supplementing enabled, further candidates are screened and
    /// pursued while fewer than `target` PDFs are on disk. Each round asks
    /// for at most the number still missing, so no more than `target` PDFs
    /// are ever acquired.
    async fn acquire(
        &self,
        material: &MaterialRecord,
        candidates: &[PaperCandidate],
        screening: &mut FilterOutcome,
        target: usize,
        run_dir: &RunDirectory,
    ) -> Result<(Vec<AcquisitionResult>, usize), MatlitError> {
        let initial = by_priority(candidates, screening, screening.accepted_indices());
        let mut acquisitions = self.acquirer.acquire_all(initial, run_dir).await?;
        let mut rounds = 0;

        while self.config.acquisition.supplement {
            let acquired = acquisitions
                .iter()
                .filter(|a| a.status == AcquisitionStatus::Acquired)
                .count();
            if acquired >= target || screening.evaluated_prefix() >= candidates.len() {
                break;
            }
            let newly_accepted = self
                .filter
                .extend(material, candidates, screening, target - acquired)
                .await;
            if newly_accepted.is_empty() {
                break;
            }
            rounds += 1;
            info!(
                round = rounds,
                acquired,
                target,
                pursuing = newly_accepted.len(),
                "Supplementing acquisitions"
            );
            let batch = by_priority(candidates, screening, newly_accepted);
            acquisitions.extend(self.acquirer.acquire_all(batch, run_dir).await?);
        }
        Ok((acquisitions, rounds))
    }

    /// Analyse every acquired PDF, in search order.
    async fn analyze(
        &self,
        material: &MaterialRecord,
        candidates: &[PaperCandidate],
        acquisitions: &[AcquisitionResult],
    ) -> Result<Vec<AnalysisResult>, MatlitError> {
        if !self.config.analysis.enabled {
            return Ok(Vec::new());
        }
        let stored: HashMap<&str, &PathBuf> = acquisitions
            .iter()
            .filter(|a| a.status == AcquisitionStatus::Acquired)
            .filter_map(|a| a.file_path.as_ref().map(|p| (a.paper_id.as_str(), p)))
            .collect();
        let papers: Vec<(PaperCandidate, PathBuf)> = candidates
            .iter()
            .filter_map(|c| {
                stored
                    .get(c.paper_id.as_str())
                    .map(|path| (c.clone(), (*path).clone()))
            })
            .collect();
        if papers.is_empty() {
            return Ok(Vec::new());
        }

        log_phase(RunPhase::Analyzing);
        self.analyzer.analyze_all(material, &papers).await
    }
}

/// Clone the candidates at `indices`, highest download priority first.
/// Ties keep search order.
fn by_priority(
    candidates: &[PaperCandidate],
    screening: &FilterOutcome,
    mut indices: Vec<usize>,
) -> Vec<PaperCandidate> {
    let priority = |i: usize| {
        let score = screening.verdicts[i].as_ref().and_then(|v| v.score);
        download_priority(&candidates[i], score)
    };
    indices.sort_by(|&a, &b| priority(b).total_cmp(&priority(a)));
    indices.into_iter().map(|i| candidates[i].clone()).collect()
}

/// Run blocking filesystem work off the async worker threads.
async fn blocking<T, F>(work: F) -> Result<T, MatlitError>
where
    F: FnOnce() -> Result<T, MatlitError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| MatlitError::Io(std::io::Error::other(e)))?
}

fn log_phase(phase: RunPhase) {
    info!(%phase, "Pipeline phase");
}
