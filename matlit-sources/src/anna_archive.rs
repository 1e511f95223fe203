//! Anna's Archive, the shadow-library channel.
//!
//! A DOI is resolved to a file MD5 through the SciDB page (falling back to
//! the site search), the MD5 is exchanged for a download URL through the
//! member fast-download API, and the file is fetched from that URL.

use async_trait::async_trait;
use matlit_core::config::RetryConfig;
use matlit_core::{ApiError, FullText, FullTextSource, PaperCandidate, RequestRateLimiter};
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::http::{
    build_client, check_status, encode_doi_path, json_body, map_send_error, normalize_base_url,
};

pub const PROVIDER: &str = "anna_archive";

pub struct AnnaArchiveClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    limiter: RequestRateLimiter,
    md5_link: Regex,
    md5_bare: Regex,
}

impl AnnaArchiveClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        rpm: usize,
        retry: &RetryConfig,
        download_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let pattern_error = |e: regex::Error| ApiError::ResponseParse {
            provider: PROVIDER.to_string(),
            message: format!("invalid MD5 pattern: {e}"),
        };
        Ok(Self {
            client: build_client(retry, download_timeout)?,
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
            timeout: download_timeout,
            limiter: RequestRateLimiter::new(PROVIDER, rpm),
            md5_link: Regex::new(r"(?i)/md5/([a-f0-9]{32})\b").map_err(pattern_error)?,
            md5_bare: Regex::new(r"(?i)\b([a-f0-9]{32})\b").map_err(pattern_error)?,
        })
    }

    /// First file MD5 mentioned in an HTML page, preferring `/md5/` links.
    pub fn extract_md5(&self, html: &str) -> Option<String> {
        self.md5_link
            .captures(html)
            .or_else(|| self.md5_bare.captures(html))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_lowercase())
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        self.limiter.acquire().await;
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;
        let response = check_status(PROVIDER, response).await?;
        response
            .text()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))
    }

    /// Resolve a DOI to an MD5: SciDB page first, then a site search.
    async fn resolve_md5(&self, doi: &str) -> Result<Option<String>, ApiError> {
        let scidb_url = format!("{}/scidb/{}/", self.base_url, encode_doi_path(doi));
        match self.get_text(&scidb_url, &[]).await {
            Ok(html) => {
                if let Some(md5) = self.extract_md5(&html) {
                    return Ok(Some(md5));
                }
            }
            Err(ApiError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        debug!(doi, "SciDB page had no MD5, trying search");
        let search_url = format!("{}/search", self.base_url);
        let query = format!("\"doi:{doi}\"");
        match self.get_text(&search_url, &[("q", query.as_str())]).await {
            Ok(html) => Ok(self.extract_md5(&html)),
            Err(ApiError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fast_download_url(&self, md5: &str) -> Result<String, ApiError> {
        self.limiter.acquire().await;
        let url = format!("{}/dyn/api/fast_download.json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("md5", md5), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;
        let response = check_status(PROVIDER, response).await?;
        let body = json_body(PROVIDER, response).await?;
        parse_fast_download(&body, md5)
    }
}

/// Extract `download_url` from a fast-download API answer.
pub fn parse_fast_download(body: &Value, md5: &str) -> Result<String, ApiError> {
    match body.get("download_url").and_then(Value::as_str) {
        Some(url) if !url.is_empty() && url != "null" => Ok(url.to_string()),
        _ => {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no download_url in response");
            Err(ApiError::NotFound {
                provider: PROVIDER.to_string(),
                what: format!("md5 {md5}: {reason}"),
            })
        }
    }
}

#[async_trait]
impl FullTextSource for AnnaArchiveClient {
    async fn fetch(&self, candidate: &PaperCandidate) -> Result<FullText, ApiError> {
        let Some(doi) = candidate
            .doi
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
        else {
            return Err(ApiError::NotFound {
                provider: PROVIDER.to_string(),
                what: "paper has no DOI".to_string(),
            });
        };

        let Some(md5) = self.resolve_md5(doi).await? else {
            return Err(ApiError::NotFound {
                provider: PROVIDER.to_string(),
                what: format!("no file for DOI {doi}"),
            });
        };
        debug!(doi, md5 = md5.as_str(), "Resolved DOI to file");

        let download_url = self.fast_download_url(&md5).await?;

        self.limiter.acquire().await;
        let response = self
            .client
            .get(&download_url)
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;
        let response = check_status(PROVIDER, response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;
        Ok(FullText {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
