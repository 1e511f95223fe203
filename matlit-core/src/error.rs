//! Error types for the matlit pipeline.
//!
//! Uses `thiserror` for public API error types. `ApiError` is the tagged
//! outcome of every external call; `MatlitError` is what aborts a run.

use std::time::Duration;

/// Top-level error type for the matlit core library.
#[derive(Debug, thiserror::Error)]
pub enum MatlitError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid material ID '{input}': expected 'mp-<digits>' or '<digits>'")]
    InvalidMaterialId { input: String },

    #[error("Material not found: {material_id}")]
    MaterialNotFound { material_id: String },

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required API keys: {}", vars.join(", "))]
    MissingCredentials { vars: Vec<String> },

    #[error("Invalid value for {var}: '{value}' (expected true/false)")]
    InvalidFlag { var: String, value: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

/// Outcome of a failed call to one of the external services.
///
/// Every HTTP client maps its responses onto these variants so the pipeline
/// can tell "this does not exist" apart from "try again later" and "this will
/// never work".
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("{provider}: not found: {what}")]
    NotFound { provider: String, what: String },

    #[error("{provider}: rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    #[error("{provider}: request timed out after {timeout_secs}s")]
    Timeout { provider: String, timeout_secs: u64 },

    #[error("{provider}: connection failed: {message}")]
    Connection { provider: String, message: String },

    #[error("{provider}: server error (HTTP {status})")]
    Server { provider: String, status: u16 },

    #[error("{provider}: authentication failed (HTTP {status})")]
    AuthFailed { provider: String, status: u16 },

    #[error("{provider}: request rejected (HTTP {status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider}: malformed response: {message}")]
    ResponseParse { provider: String, message: String },
}

impl ApiError {
    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(
        provider: &str,
        status: u16,
        retry_after: Option<Duration>,
        body: &str,
    ) -> Self {
        let provider = provider.to_string();
        match status {
            404 | 410 => ApiError::NotFound {
                provider,
                what: truncate(body, 200),
            },
            401 | 403 => ApiError::AuthFailed { provider, status },
            408 => ApiError::Timeout {
                provider,
                timeout_secs: 0,
            },
            429 => ApiError::RateLimited {
                provider,
                retry_after_secs: retry_after.map(|d| d.as_secs()).unwrap_or(5),
            },
            500..=599 => ApiError::Server { provider, status },
            _ => ApiError::Rejected {
                provider,
                status,
                message: truncate(body, 200),
            },
        }
    }

    /// Whether the call may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::Timeout { .. }
                | ApiError::Connection { .. }
                | ApiError::Server { .. }
        )
    }

    /// Minimum wait requested by the provider, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            ApiError::NotFound { provider, .. }
            | ApiError::RateLimited { provider, .. }
            | ApiError::Timeout { provider, .. }
            | ApiError::Connection { provider, .. }
            | ApiError::Server { provider, .. }
            | ApiError::AuthFailed { provider, .. }
            | ApiError::Rejected { provider, .. }
            | ApiError::ResponseParse { provider, .. } => provider,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

/// A type alias for results using the top-level `MatlitError`.
pub type Result<T> = std::result::Result<T, MatlitError>;
