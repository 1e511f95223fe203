//! Configuration system for matlit.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/matlit/config.toml` and/or `.matlit/config.toml`
//! in the working directory.
//!
//! API keys are deliberately not part of [`PipelineConfig`]; they are read
//! from the process environment by [`Credentials`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level, non-secret configuration for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub output: OutputConfig,
    pub search: SearchConfig,
    pub relevance: RelevanceConfig,
    pub acquisition: AcquisitionConfig,
    pub analysis: AnalysisConfig,
    pub retry: RetryConfig,
    pub rate_limits: RateLimitsConfig,
    pub endpoints: EndpointsConfig,
}

/// Where run directories are created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("results"),
        }
    }
}

/// Paper search sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Candidates requested per desired paper.
    pub oversample_factor: usize,
    /// Floor on the number of candidates collected.
    pub min_candidates: usize,
    /// Hard ceiling on the number of candidates collected.
    pub max_candidates: usize,
    /// Results requested per page.
    pub page_size: usize,
    /// Extra query terms appended after the formula.
    pub extra_keywords: Vec<String>,
    /// Drop candidates whose title and abstract never mention the formula.
    pub require_formula_mention: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            oversample_factor: 5,
            min_candidates: 20,
            max_candidates: 200,
            page_size: 100,
            extra_keywords: Vec::new(),
            require_formula_mention: false,
        }
    }
}

impl SearchConfig {
    /// Number of candidates to collect for `desired` papers.
    pub fn candidate_cap(&self, desired: usize) -> usize {
        desired
            .saturating_mul(self.oversample_factor)
            .max(self.min_candidates)
            .min(self.max_candidates)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    pub model: String,
    /// Maximum classifications in flight at once.
    pub concurrency: usize,
    /// Scores below this force a negative verdict.
    pub min_score: f32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            concurrency: 4,
            min_score: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Maximum acquisitions in flight at once.
    pub concurrency: usize,
    /// Bodies shorter than this are not accepted as PDFs.
    pub min_pdf_bytes: u64,
    pub download_timeout_secs: u64,
    /// Keep screening and acquiring further candidates until the target
    /// number of PDFs is on disk or the candidates run out.
    pub supplement: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            min_pdf_bytes: 1024,
            download_timeout_secs: 120,
            supplement: false,
        }
    }
}

/// Content analysis of acquired PDFs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub enabled: bool,
    /// Maximum analyses in flight at once.
    pub concurrency: usize,
    /// PDFs larger than this are not sent to the model.
    pub max_pdf_bytes: u64,
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 2,
            max_pdf_bytes: 20 * 1024 * 1024,
            request_timeout_secs: 180,
        }
    }
}

/// Retry policy shared by every external call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 32_000,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl RetryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Requests-per-minute budgets per provider (0 = unlimited).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub materials_project_rpm: usize,
    pub semantic_scholar_rpm: usize,
    pub gemini_rpm: usize,
    pub elsevier_rpm: usize,
    pub anna_archive_rpm: usize,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            materials_project_rpm: 60,
            semantic_scholar_rpm: 90,
            gemini_rpm: 15,
            elsevier_rpm: 50,
            anna_archive_rpm: 30,
        }
    }
}

/// Base URLs of the external services. Overridable for testing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub materials_project: String,
    pub semantic_scholar: String,
    pub gemini: String,
    pub elsevier: String,
    pub anna_archive: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            materials_project: "https://api.materialsproject.org".to_string(),
            semantic_scholar: "https://api.semanticscholar.org/graph/v1".to_string(),
            gemini: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            elsevier: "https://api.elsevier.com".to_string(),
            anna_archive: "https://annas-archive.org".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Validate this configuration and return any warnings.
    ///
    /// Hard errors (values the pipeline cannot run with) are returned as
    /// `ConfigError::Invalid`.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();

        if self.relevance.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "relevance.concurrency must be at least 1".into(),
            });
        }
        if self.acquisition.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "acquisition.concurrency must be at least 1".into(),
            });
        }
        if self.analysis.enabled && self.analysis.concurrency == 0 {
            return Err(ConfigError::Invalid {
                message: "analysis.concurrency must be at least 1".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "retry.max_attempts must be at least 1".into(),
            });
        }
        if self.search.page_size == 0 {
            return Err(ConfigError::Invalid {
                message: "search.page_size must be at least 1".into(),
            });
        }
        if self.search.min_candidates > self.search.max_candidates {
            warnings.push(format!(
                "search.min_candidates ({}) exceeds search.max_candidates ({}); the maximum wins",
                self.search.min_candidates, self.search.max_candidates
            ));
        }
        if !(0.0..=10.0).contains(&self.relevance.min_score) {
            warnings.push(format!(
                "relevance.min_score {} is outside the 0-10 scale",
                self.relevance.min_score
            ));
        }
        if self.relevance.concurrency > 16 {
            warnings.push(format!(
                "relevance.concurrency {} is high for a {} rpm budget",
                self.relevance.concurrency, self.rate_limits.gemini_rpm
            ));
        }
        if self.acquisition.min_pdf_bytes < 5 {
            warnings.push("acquisition.min_pdf_bytes below 5 accepts truncated files".into());
        }

        Ok(warnings)
    }
}

/// Values given on the command line. Only the fields that are set replace
/// what the files and environment provided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub output_dir: Option<PathBuf>,
    pub analysis_enabled: Option<bool>,
    pub supplement: Option<bool>,
}

impl ConfigOverrides {
    fn apply(&self, mut figment: Figment) -> Figment {
        if let Some(dir) = &self.output_dir {
            figment = figment.merge(Serialized::default("output.base_dir", dir));
        }
        if let Some(enabled) = self.analysis_enabled {
            figment = figment.merge(Serialized::default("analysis.enabled", enabled));
        }
        if let Some(supplement) = self.supplement {
            figment = figment.merge(Serialized::default("acquisition.supplement", supplement));
        }
        figment
    }
}

/// Load configuration from all sources, merged in priority order:
/// defaults, user file, working-directory file, `MATLIT_` environment,
/// then `overrides`.
pub fn load_config(
    workdir: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<PipelineConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(PipelineConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(dir) = workdir {
        let local_config = dir.join(".matlit").join("config.toml");
        if local_config.exists() {
            figment = figment.merge(Toml::file(&local_config));
        }
    }

    // MATLIT_SEARCH__PAGE_SIZE, MATLIT_RELEVANCE__MODEL, ...
    figment = figment.merge(Env::prefixed("MATLIT_").split("__"));

    overrides.apply(figment).extract().map_err(Box::new)
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "matlit", "matlit")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

pub const MP_API_KEY: &str = "MP_API_KEY";
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ELSEVIER_API_KEY: &str = "ELSEVIER_API_KEY";
pub const SEMANTIC_SCHOLAR_API_KEY: &str = "SEMANTIC_SCHOLAR_API_KEY";
pub const ANNA_ARCHIVE_API_KEY: &str = "ANNA_ARCHIVE_API_KEY";
pub const WITHIN_INSTITUTIONAL_IP: &str = "WITHIN_INSTITUTIONAL_IP";

/// API keys and the institutional-access flag.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub materials_project: String,
    pub gemini: String,
    pub elsevier: String,
    pub semantic_scholar: String,
    pub anna_archive: String,
    /// Whether the machine is on a network with publisher access.
    pub institutional_access: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("materials_project", &"[REDACTED]")
            .field("gemini", &"[REDACTED]")
            .field("elsevier", &"[REDACTED]")
            .field("semantic_scholar", &"[REDACTED]")
            .field("anna_archive", &"[REDACTED]")
            .field("institutional_access", &self.institutional_access)
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary lookup function.
    ///
    /// Every missing or empty key is collected so the user sees all of them
    /// at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut required = |name: &str| -> String {
            match lookup(name).map(|v| v.trim().to_string()) {
                Some(value) if !value.is_empty() => value,
                _ => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };

        let materials_project = required(MP_API_KEY);
        let gemini = required(GEMINI_API_KEY);
        let elsevier = required(ELSEVIER_API_KEY);
        let semantic_scholar = required(SEMANTIC_SCHOLAR_API_KEY);
        let anna_archive = required(ANNA_ARCHIVE_API_KEY);

        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials { vars: missing });
        }

        let institutional_access = match lookup(WITHIN_INSTITUTIONAL_IP) {
            Some(raw) => parse_flag(WITHIN_INSTITUTIONAL_IP, &raw)?,
            None => false,
        };

        Ok(Self {
            materials_project,
            gemini,
            elsevier,
            semantic_scholar,
            anna_archive,
            institutional_access,
        })
    }
}

/// Parse a boolean environment flag.
pub fn parse_flag(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var: var.to_string(),
            value: raw.to_string(),
        }),
    }
}
