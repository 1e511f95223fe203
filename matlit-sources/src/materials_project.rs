//! Materials Project summary API client.

use async_trait::async_trait;
use matlit_core::config::RetryConfig;
use matlit_core::{ApiError, MaterialId, MaterialRecord, MaterialSource, RequestRateLimiter};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::http::{build_client, check_status, json_body, map_send_error, normalize_base_url};

pub const PROVIDER: &str = "materials_project";

const SUMMARY_FIELDS: &str = "material_id,formula_pretty,composition,elements,formation_energy_per_atom,band_gap,density,symmetry,is_magnetic,theoretical";

pub struct MaterialsProjectClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    limiter: RequestRateLimiter,
}

impl MaterialsProjectClient {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        rpm: usize,
        retry: &RetryConfig,
    ) -> Result<Self, ApiError> {
        let timeout = retry.request_timeout();
        Ok(Self {
            client: build_client(retry, timeout)?,
            base_url: normalize_base_url(base_url),
            api_key: api_key.into(),
            timeout,
            limiter: RequestRateLimiter::new(PROVIDER, rpm),
        })
    }
}

#[async_trait]
impl MaterialSource for MaterialsProjectClient {
    async fn fetch(&self, id: &MaterialId) -> Result<MaterialRecord, ApiError> {
        self.limiter.acquire().await;
        let url = format!("{}/materials/summary/", self.base_url);
        debug!(material_id = %id, url = url.as_str(), "Fetching material summary");

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .header("accept", "application/json")
            .query(&[("material_ids", id.as_str()), ("_fields", SUMMARY_FIELDS)])
            .send()
            .await
            .map_err(|e| map_send_error(PROVIDER, self.timeout, e))?;
        let response = check_status(PROVIDER, response).await?;
        let body = json_body(PROVIDER, response).await?;
        parse_summary_response(&body, id)
    }
}

/// Parse a `/materials/summary/` response. An empty `data` array means the
/// material does not exist.
pub fn parse_summary_response(body: &Value, id: &MaterialId) -> Result<MaterialRecord, ApiError> {
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::ResponseParse {
            provider: PROVIDER.to_string(),
            message: "Missing 'data' array in response".to_string(),
        })?;
    let Some(doc) = data.first() else {
        return Err(ApiError::NotFound {
            provider: PROVIDER.to_string(),
            what: id.to_string(),
        });
    };

    let formula = doc
        .get("formula_pretty")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::ResponseParse {
            provider: PROVIDER.to_string(),
            message: "Missing 'formula_pretty' in material document".to_string(),
        })?
        .to_string();

    let material_id = doc
        .get("material_id")
        .and_then(Value::as_str)
        .and_then(|raw| MaterialId::parse(raw).ok())
        .unwrap_or_else(|| id.clone());

    let composition: BTreeMap<String, f64> = doc
        .get("composition")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(el, amount)| amount.as_f64().map(|a| (el.clone(), a)))
                .collect()
        })
        .unwrap_or_default();

    let elements = doc
        .get("elements")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|e| e.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let symmetry = doc.get("symmetry");
    let symmetry_field = |key: &str| {
        symmetry
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(MaterialRecord {
        material_id,
        formula,
        composition,
        elements,
        crystal_system: symmetry_field("crystal_system"),
        space_group: symmetry_field("symbol"),
        band_gap: doc.get("band_gap").and_then(Value::as_f64),
        formation_energy_per_atom: doc.get("formation_energy_per_atom").and_then(Value::as_f64),
        density: doc.get("density").and_then(Value::as_f64),
        is_magnetic: doc.get("is_magnetic").and_then(Value::as_bool),
        theoretical: doc.get("theoretical").and_then(Value::as_bool),
    })
}
