//! Shared HTTP plumbing: client construction and response mapping.

use matlit_core::ApiError;
use matlit_core::config::RetryConfig;
use reqwest::header::HeaderMap;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("matlit/", env!("CARGO_PKG_VERSION"));

/// Build a client with the configured timeouts.
pub fn build_client(retry: &RetryConfig, timeout: Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(retry.connect_timeout())
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ApiError::Connection {
            provider: "http".to_string(),
            message: format!("Failed to create HTTP client: {e}"),
        })
}

/// Map a transport-level failure.
pub fn map_send_error(provider: &str, timeout: Duration, error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout {
            provider: provider.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else {
        ApiError::Connection {
            provider: provider.to_string(),
            message: error.to_string(),
        }
    }
}

/// Pass successful responses through; turn everything else into an [`ApiError`].
pub async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_status(
        provider,
        status.as_u16(),
        retry_after,
        &body,
    ))
}

/// Read a successful response body as JSON.
pub async fn json_body(
    provider: &str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ApiError> {
    let text = response.text().await.map_err(|e| ApiError::ResponseParse {
        provider: provider.to_string(),
        message: format!("Failed to read response body: {e}"),
    })?;
    serde_json::from_str(&text).map_err(|e| ApiError::ResponseParse {
        provider: provider.to_string(),
        message: format!("Invalid JSON in response: {e}"),
    })
}

/// Parse the `Retry-After` header of a 429 response.
///
/// Supports whole seconds and fractional seconds with an `s` suffix
/// (e.g. `0.5s`). HTTP dates are not interpreted.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after").and_then(|v| v.to_str().ok())?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Some(stripped) = value.strip_suffix('s')
        && let Ok(secs) = stripped.parse::<f64>()
        && secs.is_finite()
        && secs >= 0.0
    {
        return Some(Duration::from_secs_f64(secs));
    }
    None
}

/// Percent-encode each path segment of a DOI, keeping the `/` separators.
pub fn encode_doi_path(doi: &str) -> String {
    doi.trim()
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Strip a trailing slash so paths can be appended with `format!`.
pub fn normalize_base_url(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_parse_retry_after_fractional() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("0.5s"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_parse_retry_after_missing_or_date() {
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_encode_doi_path() {
        assert_eq!(encode_doi_path("10.1016/j.jallcom.2020.1"), "10.1016/j.jallcom.2020.1");
        assert_eq!(
            encode_doi_path("10.1002/(SICI)1097<4636>#3"),
            "10.1002/%28SICI%291097%3C4636%3E%233"
        );
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://x/api/"), "http://x/api");
        assert_eq!(normalize_base_url("http://x"), "http://x");
    }
}
