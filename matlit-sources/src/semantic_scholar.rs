//! Semantic Scholar Graph API paper search.

use async_trait::async_trait;
use matlit_core::config::RetryConfig;
use matlit_core::{
    ApiError, PaperCandidate, PaperSearchSource, RequestRateLimiter, SearchPage, SearchQuery,
};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::http::{build_client, check_status, json_body, map_send_error, normalize_base_url};

pub const PROVIDER: &str = "semantic_scholar";

const SEARCH_FIELDS: &str = "paperId,title,authors,venue,year,citationCount,abstract,externalIds";

/// The search endpoint rejects larger pages.
const MAX_PAGE_SIZE: usize = 100;

pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    limiter: RequestRateLimiter,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl SemanticScholarClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        rpm: usize,
        retry: &RetryConfig,
    ) -> Result<Self, ApiError> {
        let timeout = retry.request_timeout();
        Ok(Self {
            client: build_client(retry, timeout)?,
            base_url: normalize_base_url(base_url),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
            limiter: RequestRateLimiter::new(PROVIDER, rpm),
            min_interval: Duration::from_secs(1),
            last_request: Mutex::new(None),
        })
    }

    /// Override the minimum spacing between consecutive requests.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Enforce the minimum delay between requests.
    async fn space_requests(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(instant) = *last {
            let elapsed = instant.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl PaperSearchSource for SemanticScholarClient {
    async fn search_page(
        &self,
        query: &SearchQuery,
        offset: usize,
        limit: usize,
    ) -> Result<SearchPage, ApiError> {
        self.limiter.acquire().await;
        self.space_requests().await;

        let url = format!("{}/paper/search", self.base_url);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let query_text = query.text();
        debug!(query = query_text.as_str(), offset, limit, "Semantic Scholar search");

        let offset_param = offset.to_string();
        let limit_param = limit.to_string();
        let mut request = self.client.get(&url).query(&[
            ("query", query_text.as_str()),
            ("offset", offset_param.as_str()),
            ("limit", limit_param.as_str()),
            ("fields", SEARCH_FIELDS),
        ]);
        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;
        let response = check_status(PROVIDER, response).await?;
        let body = json_body(PROVIDER, response).await?;
        parse_search_response(&body)
    }
}

/// Parse a `/paper/search` response page.
pub fn parse_search_response(body: &Value) -> Result<SearchPage, ApiError> {
    let papers = match body.get("data") {
        Some(Value::Array(items)) => items.iter().filter_map(parse_paper).collect(),
        // the API omits `data` when there are no matches
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            return Err(ApiError::ResponseParse {
                provider: PROVIDER.to_string(),
                message: "'data' is not an array".to_string(),
            });
        }
    };
    Ok(SearchPage {
        papers,
        next_offset: body.get("next").and_then(Value::as_u64).map(|n| n as usize),
        total: body.get("total").and_then(Value::as_u64).map(|n| n as usize),
    })
}

fn parse_paper(item: &Value) -> Option<PaperCandidate> {
    let paper_id = item.get("paperId").and_then(Value::as_str)?.to_string();
    let title = item
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())?
        .to_string();

    let non_empty = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let authors = item
        .get("authors")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let doi = item
        .get("externalIds")
        .and_then(|ids| ids.get("DOI"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Some(PaperCandidate {
        paper_id,
        title,
        abstract_text: non_empty("abstract"),
        authors,
        venue: non_empty("venue"),
        year: item.get("year").and_then(Value::as_i64).map(|y| y as i32),
        doi,
        citation_count: item.get("citationCount").and_then(Value::as_u64),
        rank: 0,
    })
}
