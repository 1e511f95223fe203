//! Elsevier Article Retrieval API, the publisher channel.
//!
//! Only works from an institutional network; the pipeline calls it only when
//! institutional access is enabled.

use async_trait::async_trait;
use matlit_core::config::RetryConfig;
use matlit_core::{
    ApiError, FullText, FullTextSource, PaperCandidate, PublisherKind, RequestRateLimiter,
};
use std::time::Duration;
use tracing::debug;

use crate::http::{build_client, check_status, encode_doi_path, map_send_error, normalize_base_url};

pub const PROVIDER: &str = "elsevier";

pub struct ElsevierClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    limiter: RequestRateLimiter,
}

impl ElsevierClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        rpm: usize,
        retry: &RetryConfig,
        download_timeout: Duration,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_client(retry, download_timeout)?,
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
            timeout: download_timeout,
            limiter: RequestRateLimiter::new(PROVIDER, rpm),
        })
    }

    fn article_url(&self, doi: &str) -> String {
        format!("{}/content/article/doi/{}", self.base_url, encode_doi_path(doi))
    }
}

/// Whether `doi` belongs to an Elsevier imprint.
pub fn is_elsevier_doi(doi: &str) -> bool {
    matlit_core::types::classify_doi(Some(doi)) == PublisherKind::Elsevier
}

#[async_trait]
impl FullTextSource for ElsevierClient {
    fn handles(&self, candidate: &PaperCandidate) -> bool {
        candidate
            .doi
            .as_deref()
            .is_some_and(|doi| is_elsevier_doi(doi.trim()))
    }

    async fn fetch(&self, candidate: &PaperCandidate) -> Result<FullText, ApiError> {
        let doi = match candidate.doi.as_deref().map(str::trim) {
            Some(doi) if is_elsevier_doi(doi) => doi,
            other => {
                return Err(ApiError::NotFound {
                    provider: PROVIDER.to_string(),
                    what: format!("not an Elsevier DOI: {}", other.unwrap_or("none")),
                });
            }
        };

        self.limiter.acquire().await;
        let url = self.article_url(doi);
        debug!(doi, url = url.as_str(), "Requesting Elsevier full text");

        let response = self
            .client
            .get(&url)
            .query(&[("httpAccept", "application/pdf")])
            .header("X-ELS-APIKey", &self.api_key)
            .header("Accept", "application/pdf")
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_elsevier_doi() {
        assert!(is_elsevier_doi("10.1016/j.jmmm.2019.165"));
        assert!(is_elsevier_doi("10.1006/jssc.1999.1"));
        assert!(!is_elsevier_doi("10.1103/PhysRevB.1"));
        assert!(!is_elsevier_doi(""));
    }

    #[test]
    fn test_handles_only_elsevier_papers() {
        let client = ElsevierClient::new(
            "http://127.0.0.1:9",
            "key",
            0,
            &RetryConfig::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let elsevier = PaperCandidate::new("p", "t").with_doi(" 10.1016/j.jallcom.2020.1 ");
        let aps = PaperCandidate::new("p", "t").with_doi("10.1103/PhysRevB.1");
        assert!(client.handles(&elsevier));
        assert!(!client.handles(&aps));
        assert!(!client.handles(&PaperCandidate::new("p", "t")));
    }

    #[tokio::test]
    async fn test_non_elsevier_doi_is_not_found_without_request() {
        let client = ElsevierClient::new(
            "http://127.0.0.1:9",
            "key",
            0,
            &RetryConfig::default(),
            Duration::from_secs(1),
        )
        .unwrap();
        let paper = PaperCandidate::new("p", "t").with_doi("10.1038/nmat1");
        let err = client.fetch(&paper).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));

        let no_doi = PaperCandidate::new("p", "t");
        assert!(matches!(
            client.fetch(&no_doi).await,
            Err(ApiError::NotFound { .. })
        ));
    }
}
