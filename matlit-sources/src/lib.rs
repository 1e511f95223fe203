//! HTTP implementations of the matlit source traits.
//!
//! | client                      | trait                                 |
//! |-----------------------------|---------------------------------------|
//! | [`MaterialsProjectClient`]  | `MaterialSource`                      |
//! | [`SemanticScholarClient`]   | `PaperSearchSource`                   |
//! | [`GeminiClient`]            | `RelevanceClassifier`, `PdfAnalyzer`  |
//! | [`ElsevierClient`]          | `FullTextSource`                      |
//! | [`AnnaArchiveClient`]       | `FullTextSource`                      |

pub mod anna_archive;
pub mod elsevier;
pub mod gemini;
pub mod http;
pub mod materials_project;
pub mod semantic_scholar;

pub use anna_archive::AnnaArchiveClient;
pub use elsevier::ElsevierClient;
pub use gemini::GeminiClient;
pub use materials_project::MaterialsProjectClient;
pub use semantic_scholar::SemanticScholarClient;

use matlit_core::{ApiError, Credentials, PipelineConfig, PipelineSources};
use std::sync::Arc;
use std::time::Duration;

/// Build every HTTP source from configuration and credentials.
pub fn build_sources(
    config: &PipelineConfig,
    credentials: &Credentials,
) -> Result<PipelineSources, ApiError> {
    let endpoints = &config.endpoints;
    let limits = &config.rate_limits;
    let retry = &config.retry;
    let download_timeout = Duration::from_secs(config.acquisition.download_timeout_secs);
    let gemini = Arc::new(
        GeminiClient::new(
            &endpoints.gemini,
            credentials.gemini.clone(),
            config.relevance.model.clone(),
            limits.gemini_rpm,
            retry,
        )?
        .with_analysis_timeout(Duration::from_secs(config.analysis.request_timeout_secs)),
    );

    Ok(PipelineSources {
        materials: Arc::new(MaterialsProjectClient::new(
            &endpoints.materials_project,
            credentials.materials_project.clone(),
            limits.materials_project_rpm,
            retry,
        )?),
        search: Arc::new(SemanticScholarClient::new(
            &endpoints.semantic_scholar,
            Some(credentials.semantic_scholar.clone()),
            limits.semantic_scholar_rpm,
            retry,
        )?),
        classifier: gemini.clone(),
        publisher: Arc::new(ElsevierClient::new(
            &endpoints.elsevier,
            credentials.elsevier.clone(),
            limits.elsevier_rpm,
            retry,
            download_timeout,
        )?),
        shadow_library: Arc::new(AnnaArchiveClient::new(
            &endpoints.anna_archive,
            credentials.anna_archive.clone(),
            limits.anna_archive_rpm,
            retry,
            download_timeout,
        )?),
        analyzer: gemini,
    })
}
