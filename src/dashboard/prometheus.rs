use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::config::PrometheusConfig;
use super::types::MetricSample;
use crate::utils::http::send_checked_json;
use crate::{DashboardError, Result};

/// Anything that can answer an instant PromQL query. Never fails: an unreachable source
/// answers with no samples.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query(&self, promql: &str) -> Vec<MetricSample>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    result_type: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
struct SeriesResult {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    values: Option<Vec<Value>>,
}

/// Prometheus HTTP API client over an ordered list of candidate endpoints.
#[derive(Clone)]
pub struct PrometheusClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
    bearer_token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for PrometheusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusClient")
            .field("endpoints", &self.endpoints)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PrometheusClient {
    pub fn new(config: &PrometheusConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify)
            .build()?;
        Ok(Self {
            endpoints: config
                .endpoints
                .iter()
                .map(|endpoint| endpoint.trim().trim_end_matches('/').to_string())
                .filter(|endpoint| !endpoint.is_empty())
                .collect(),
            client,
            bearer_token: config
                .bearer_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
        })
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        if self.bearer_token.is_none() {
            self.bearer_token = token.filter(|token| !token.trim().is_empty());
        }
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Single attempt against one endpoint; the caller owns the fallback order.
    pub async fn query_endpoint(&self, endpoint: &str, promql: &str) -> Result<Vec<MetricSample>> {
        let url = format!("{endpoint}/api/v1/query");
        let mut req = self
            .client
            .get(url)
            .query(&[("query", promql)])
            .timeout(self.timeout);
        if let Some(token) = self.bearer_token.as_deref() {
            req = req.bearer_auth(token);
        }

        let response: QueryResponse = send_checked_json(req).await?;
        if response.status != "success" {
            return Err(DashboardError::InvalidResponse(format!(
                "query status {}: {} {}",
                response.status,
                response.error_type.unwrap_or_default(),
                response.error.unwrap_or_default(),
            )));
        }
        let data = response.data.ok_or_else(|| {
            DashboardError::InvalidResponse("success response without data".to_string())
        })?;
        Ok(parse_result(&data.result_type, data.result))
    }
}

#[async_trait]
impl MetricsSource for PrometheusClient {
    async fn query(&self, promql: &str) -> Vec<MetricSample> {
        for endpoint in &self.endpoints {
            match self.query_endpoint(endpoint, promql).await {
                Ok(samples) => {
                    debug!(endpoint = %endpoint, samples = samples.len(), "prometheus query ok");
                    return samples;
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "prometheus endpoint failed, trying next");
                }
            }
        }
        warn!(
            endpoints = self.endpoints.len(),
            "all prometheus endpoints failed; treating metrics as empty"
        );
        Vec::new()
    }
}

fn parse_result(result_type: &str, result: Value) -> Vec<MetricSample> {
    match result_type {
        "scalar" | "string" => vec![MetricSample {
            labels: BTreeMap::new(),
            value: sample_value(&result),
        }],
        _ => {
            let Value::Array(items) = result else {
                return Vec::new();
            };
            items
                .into_iter()
                .filter_map(|item| serde_json::from_value::<SeriesResult>(item).ok())
                .map(|series| {
                    let value = match (&series.value, &series.values) {
                        (Some(pair), _) => sample_value(pair),
                        (None, Some(points)) => points.last().map(sample_value).unwrap_or(0.0),
                        (None, None) => 0.0,
                    };
                    MetricSample {
                        labels: series.metric,
                        value,
                    }
                })
                .collect()
        }
    }
}

/// `[timestamp, "value"]`; anything unparsable or non-finite counts as zero.
fn sample_value(pair: &Value) -> f64 {
    let raw = match pair {
        Value::Array(items) => items.get(1),
        other => Some(other),
    };
    let parsed = match raw {
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(Value::Number(number)) => number.as_f64(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite()).unwrap_or(0.0)
}
