//! # matlit core
//!
//! Data model and pipeline for collecting research papers about a
//! Materials Project material: resolve the material, search for candidate
//! papers, screen them with a language model, acquire full texts, analyse
//! them and write a report.
//!
//! External services are reached only through the traits in [`material`],
//! [`search`], [`relevance`], [`acquisition`] and [`analysis`]; HTTP
//! implementations live in the `matlit-sources` crate.

pub mod acquisition;
pub mod analysis;
pub mod config;
pub mod error;
pub mod layout;
pub mod material;
pub mod pipeline;
pub mod rate_limiter;
pub mod relevance;
pub mod report;
pub mod retry;
pub mod search;
pub mod types;

pub use acquisition::{FullText, FullTextAcquirer, FullTextSource};
pub use analysis::{AnalysisRequest, ContentAnalyzer, PdfAnalyzer};
pub use config::{ConfigOverrides, Credentials, PipelineConfig, load_config};
pub use error::{ApiError, ConfigError, MatlitError, Result};
pub use layout::RunDirectory;
pub use material::{MaterialResolver, MaterialSource};
pub use pipeline::{Pipeline, PipelineSources, RunOutcome, RunPhase};
pub use rate_limiter::RequestRateLimiter;
pub use relevance::{ClassificationRequest, RelevanceClassifier, RelevanceFilter};
pub use report::{ReportAssembler, ReportWriter, read_analysis_table, read_screening_table};
pub use retry::RetryPolicy;
pub use search::{PaperSearchSource, PaperSearcher, SearchPage, SearchQuery};
pub use types::*;
