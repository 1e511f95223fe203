//! Full-Text Acquirer: obtains PDFs for accepted candidates, trying the
//! publisher first when on an institutional network and falling back to the
//! shadow library.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AcquisitionConfig;
use crate::error::{ApiError, MatlitError};
use crate::layout::RunDirectory;
use crate::retry::RetryPolicy;
use crate::types::{
    AcquisitionResult, AcquisitionStatus, AttemptOutcome, AttemptRecord, FullTextChannel,
    PaperCandidate, PublisherKind,
};

/// Downloaded document body.
#[derive(Debug, Clone, PartialEq)]
pub struct FullText {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FullText {
    pub fn pdf(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: Some("application/pdf".to_string()),
        }
    }

    /// Whether the body looks like a complete PDF of at least `min_bytes`.
    pub fn is_pdf(&self, min_bytes: u64) -> bool {
        self.bytes.starts_with(b"%PDF") && self.bytes.len() as u64 >= min_bytes
    }
}

/// One channel that can provide full texts.
#[async_trait]
pub trait FullTextSource: Send + Sync {
    async fn fetch(&self, candidate: &PaperCandidate) -> Result<FullText, ApiError>;

    /// Whether this channel can serve `candidate` at all. Channels that
    /// answer `false` are passed over without recording an attempt.
    fn handles(&self, _candidate: &PaperCandidate) -> bool {
        true
    }
}

/// Where a single candidate's acquisition currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Pending,
    PublisherAttempt,
    ShadowAttempt,
    Acquired(FullTextChannel),
    Unavailable,
}

/// Input driving an [`AcquisitionState`] transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionEvent {
    Start { institutional_access: bool },
    Attempted(AttemptOutcome),
    /// The channel does not serve this candidate.
    Skipped,
}

impl AcquisitionState {
    /// Pure transition function. Events that do not apply to the current
    /// state leave it unchanged.
    pub fn next(self, event: AcquisitionEvent) -> Self {
        use AcquisitionEvent::*;
        use AcquisitionState::*;
        match (self, event) {
            (Pending, Start { institutional_access: true }) => PublisherAttempt,
            (Pending, Start { institutional_access: false }) => ShadowAttempt,
            (PublisherAttempt, Attempted(AttemptOutcome::Retrieved)) => {
                Acquired(FullTextChannel::Publisher)
            }
            (PublisherAttempt, Attempted(_) | Skipped) => ShadowAttempt,
            (ShadowAttempt, Attempted(AttemptOutcome::Retrieved)) => {
                Acquired(FullTextChannel::ShadowLibrary)
            }
            (ShadowAttempt, Attempted(_) | Skipped) => Unavailable,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AcquisitionState::Acquired(_) | AcquisitionState::Unavailable)
    }

    /// Channel to try in this state, if any.
    pub fn channel(self) -> Option<FullTextChannel> {
        match self {
            AcquisitionState::PublisherAttempt => Some(FullTextChannel::Publisher),
            AcquisitionState::ShadowAttempt => Some(FullTextChannel::ShadowLibrary),
            _ => None,
        }
    }
}

/// Report status for a finished acquisition.
///
/// `error` wins over `denied` when any attempt failed; `denied` means the
/// publisher was asked and nobody had it.
pub fn terminal_status(state: AcquisitionState, attempts: &[AttemptRecord]) -> AcquisitionStatus {
    if let AcquisitionState::Acquired(_) = state {
        return AcquisitionStatus::Acquired;
    }
    if attempts.iter().any(|a| a.outcome == AttemptOutcome::Failed) {
        AcquisitionStatus::Error
    } else if attempts
        .iter()
        .any(|a| a.channel == FullTextChannel::Publisher)
    {
        AcquisitionStatus::Denied
    } else {
        AcquisitionStatus::NotFound
    }
}

/// Map a channel's answer onto an attempt outcome.
pub fn classify_attempt(
    result: &Result<FullText, ApiError>,
    min_pdf_bytes: u64,
) -> (AttemptOutcome, Option<String>) {
    match result {
        Ok(text) if text.is_pdf(min_pdf_bytes) => (AttemptOutcome::Retrieved, None),
        Ok(text) => (
            AttemptOutcome::NotAvailable,
            Some(format!(
                "response is not a PDF ({} bytes, {})",
                text.bytes.len(),
                text.content_type.as_deref().unwrap_or("unknown type")
            )),
        ),
        Err(e @ (ApiError::NotFound { .. } | ApiError::AuthFailed { .. })) => {
            (AttemptOutcome::NotAvailable, Some(e.to_string()))
        }
        Err(e) => (AttemptOutcome::Failed, Some(e.to_string())),
    }
}

/// Order in which accepted candidates are pursued: the relevance score,
/// plus a boost for channels likely to have the paper, plus up to two
/// points for citations.
///
/// Elsevier papers go through the publisher API, which favours recent
/// years; older papers are more often found in the shadow library.
pub fn download_priority(candidate: &PaperCandidate, score: Option<f32>) -> f64 {
    let mut priority = f64::from(score.unwrap_or(0.0));
    let year = candidate.year.unwrap_or(0);
    if candidate.publisher_kind() == PublisherKind::Elsevier {
        priority += 3.0;
        if year >= 2018 {
            priority += 1.0;
        }
    } else {
        priority += 1.0;
        if year <= 2019 {
            priority += 1.0;
        }
        if (2010..=2018).contains(&year) {
            priority += 0.5;
        }
    }
    priority + (candidate.citation_count.unwrap_or(0) as f64 / 50.0).min(2.0)
}

pub struct FullTextAcquirer {
    publisher: Arc<dyn FullTextSource>,
    shadow: Arc<dyn FullTextSource>,
    config: AcquisitionConfig,
    retry: RetryPolicy,
    institutional_access: bool,
}

impl FullTextAcquirer {
    pub fn new(
        publisher: Arc<dyn FullTextSource>,
        shadow: Arc<dyn FullTextSource>,
        config: AcquisitionConfig,
        retry: RetryPolicy,
        institutional_access: bool,
    ) -> Self {
        Self {
            publisher,
            shadow,
            config,
            retry,
            institutional_access,
        }
    }

    fn source(&self, channel: FullTextChannel) -> &Arc<dyn FullTextSource> {
        match channel {
            FullTextChannel::Publisher => &self.publisher,
            FullTextChannel::ShadowLibrary => &self.shadow,
        }
    }

    /// Try to obtain one candidate's PDF and store it under `run`.
    ///
    /// Only local write failures are errors; every remote failure is
    /// recorded in the returned result.
    pub async fn acquire(
        &self,
        candidate: &PaperCandidate,
        run: &RunDirectory,
    ) -> Result<AcquisitionResult, MatlitError> {
        let mut result = AcquisitionResult {
            paper_id: candidate.paper_id.clone(),
            status: AcquisitionStatus::NotFound,
            source: None,
            file_path: None,
            bytes: 0,
            attempts: Vec::new(),
        };
        if candidate.doi.as_deref().is_none_or(|d| d.trim().is_empty()) {
            debug!(paper_id = %candidate.paper_id, "No DOI, skipping acquisition");
            return Ok(result);
        }

        let mut state = AcquisitionState::Pending.next(AcquisitionEvent::Start {
            institutional_access: self.institutional_access,
        });

        while let Some(channel) = state.channel() {
            let source = self.source(channel);
            if !source.handles(candidate) {
                debug!(paper_id = %candidate.paper_id, %channel, "Channel does not serve this paper");
                state = state.next(AcquisitionEvent::Skipped);
                continue;
            }
            let fetched = self
                .retry
                .run("full_text_fetch", || source.fetch(candidate))
                .await;
            let (outcome, detail) = classify_attempt(&fetched, self.config.min_pdf_bytes);
            debug!(
                paper_id = %candidate.paper_id,
                %channel,
                ?outcome,
                "Full-text attempt finished"
            );
            result.attempts.push(AttemptRecord {
                channel,
                outcome,
                detail,
            });

            if outcome == AttemptOutcome::Retrieved
                && let Ok(text) = fetched
            {
                let path = run.pdf_path(candidate);
                write_atomically(&path, &text.bytes).await?;
                result.file_path = Some(path);
                result.bytes = text.bytes.len() as u64;
                result.source = Some(channel);
            }
            state = state.next(AcquisitionEvent::Attempted(outcome));
        }

        result.status = terminal_status(state, &result.attempts);
        match result.status {
            AcquisitionStatus::Acquired => info!(
                paper_id = %candidate.paper_id,
                source = ?result.source,
                bytes = result.bytes,
                "Full text acquired"
            ),
            status => warn!(
                paper_id = %candidate.paper_id,
                %status,
                "Full text not acquired"
            ),
        }
        Ok(result)
    }

    /// Acquire every candidate with bounded concurrency.
    ///
    /// Results are in the same order as `candidates`. A task that panics is
    /// recorded as an `error` for its candidate. A local IO failure cancels
    /// every task still running before the error is returned, so nothing
    /// more is written to `run`.
    pub async fn acquire_all(
        self: &Arc<Self>,
        candidates: Vec<PaperCandidate>,
        run: &RunDirectory,
    ) -> Result<Vec<AcquisitionResult>, MatlitError> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.concurrency.max(1)));
        let mut handles = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let acquirer = Arc::clone(self);
            let run = run.clone();
            let sem = semaphore.clone();
            let paper_id = candidate.paper_id.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                acquirer.acquire(&candidate, &run).await
            });
            handles.push((paper_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut handles = handles.into_iter();
        while let Some((paper_id, handle)) = handles.next() {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    let remaining: Vec<_> = handles.by_ref().map(|(_, handle)| handle).collect();
                    warn!(
                        %paper_id,
                        error = %e,
                        cancelled = remaining.len(),
                        "Local write failed, cancelling acquisitions"
                    );
                    for handle in &remaining {
                        handle.abort();
                    }
                    for handle in remaining {
                        let _ = handle.await;
                    }
                    return Err(e);
                }
                Err(join_error) => {
                    warn!(%paper_id, error = %join_error, "Acquisition task failed");
                    results.push(AcquisitionResult {
                        paper_id,
                        status: AcquisitionStatus::Error,
                        source: None,
                        file_path: None,
                        bytes: 0,
                        attempts: Vec::new(),
                    });
                }
            }
        }
        Ok(results)
    }
}

/// Write `bytes` to a sibling temp file, then rename it into place.
async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp: PathBuf = path.with_extension("pdf.part");
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
