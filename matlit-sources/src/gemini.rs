//! Gemini `generateContent` client, used both as the relevance classifier
//! and as the PDF content analyzer. Both roles share one rate limiter.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use matlit_core::config::RetryConfig;
use matlit_core::{
    AnalysisRequest, ApiError, ClassificationRequest, PdfAnalyzer, RelevanceClassifier,
    RequestRateLimiter,
};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use crate::http::{build_client, check_status, json_body, map_send_error, normalize_base_url};

pub const PROVIDER: &str = "gemini";

pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    analysis_timeout: Duration,
    limiter: RequestRateLimiter,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        rpm: usize,
        retry: &RetryConfig,
    ) -> Result<Self, ApiError> {
        let timeout = retry.request_timeout();
        Ok(Self {
            client: build_client(retry, timeout)?,
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            analysis_timeout: timeout,
            limiter: RequestRateLimiter::new(PROVIDER, rpm),
        })
    }

    /// Build the endpoint URL; the key travels as a `?key=` query parameter.
    fn endpoint_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url,
            self.model,
            method,
            urlencoding::encode(&self.api_key)
        )
    }

    /// Reading a whole PDF takes far longer than a classification.
    pub fn with_analysis_timeout(mut self, timeout: Duration) -> Self {
        self.analysis_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, body: &Value, timeout: Duration) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.endpoint_url("generateContent"))
            .header("content-type", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, timeout, e))?;
        let response = check_status(PROVIDER, response).await?;
        let body = json_body(PROVIDER, response).await?;
        parse_response_text(&body)
    }
}

/// Request body for a deterministic, JSON-only answer.
pub fn build_request_body(prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": prompt}]
        }],
        "generationConfig": {
            "temperature": 0.0,
            "responseMimeType": "application/json"
        }
    })
}

/// Request body carrying the PDF inline next to the prompt. The answer is
/// free-form Markdown, so no response MIME type is forced.
pub fn build_analysis_body(prompt: &str, pdf: &[u8]) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {"inline_data": {"mime_type": "application/pdf", "data": STANDARD.encode(pdf)}},
                {"text": prompt}
            ]
        }],
        "generationConfig": {
            "temperature": 0.2
        }
    })
}

/// Concatenate the text parts of the first candidate.
pub fn parse_response_text(body: &Value) -> Result<String, ApiError> {
    let parse_error = |message: String| ApiError::ResponseParse {
        provider: PROVIDER.to_string(),
        message,
    };

    let candidates = body["candidates"].as_array();
    let Some(candidate) = candidates.and_then(|c| c.first()) else {
        let reason = body["promptFeedback"]["blockReason"]
            .as_str()
            .map(|r| format!("prompt blocked: {r}"))
            .unwrap_or_else(|| "Missing 'candidates' in response".to_string());
        return Err(parse_error(reason));
    };

    let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
        let finish = candidate["finishReason"].as_str().unwrap_or("unknown");
        parse_error(format!("Missing 'parts' in candidate content (finishReason {finish})"))
    })?;

    let text: String = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(parse_error("Candidate contained no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl RelevanceClassifier for GeminiClient {
    async fn classify(&self, request: &ClassificationRequest) -> Result<String, ApiError> {
        self.limiter.acquire().await;
        debug!(
            model = self.model.as_str(),
            paper_id = request.paper_id.as_str(),
            "Sending Gemini classification request"
        );
        self.generate(&build_request_body(&request.prompt), self.timeout)
            .await
    }
}

#[async_trait]
impl PdfAnalyzer for GeminiClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ApiError> {
        self.limiter.acquire().await;
        debug!(
            model = self.model.as_str(),
            paper_id = request.paper_id.as_str(),
            pdf_bytes = request.pdf.len(),
            "Sending Gemini analysis request"
        );
        self.generate(
            &build_analysis_body(&request.prompt, &request.pdf),
            self.analysis_timeout,
        )
        .await
    }
}
