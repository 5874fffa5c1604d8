//! Request simulator: forwards chat completions through the gateway so policies can be
//! exercised interactively, and records each attempt as a [`RequestLogEntry`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, HOST, HeaderMap, HeaderValue};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use super::access_log::denial_for_status;
use super::config::SimulatorConfig;
use super::types::{
    AuthenticationDetails, Decision, EnforcementPoint, ModelInferenceDetails,
    PolicyDecisionDetails, PolicyType, PolicyVerdict, RequestLogEntry, RequestSource,
};
use crate::utils::clock::format_rfc3339;
use crate::utils::http::response_text_truncated;
use crate::{DashboardError, Result};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const MAX_UPSTREAM_BODY_BYTES: usize = 1024 * 1024;
const KEY_PREFIX_CHARS: usize = 6;

/// What the caller supplied besides the JSON body.
#[derive(Clone, Debug, Default)]
pub struct SimulatedRequest {
    pub body: Value,
    pub authorization: Option<String>,
    /// Explicit `x-model-host` override.
    pub host: Option<String>,
}

impl SimulatedRequest {
    pub fn model(&self) -> Option<&str> {
        self.body.get("model").and_then(Value::as_str)
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamReply {
    pub status: u16,
    /// Parsed JSON, or the raw text as a JSON string when the body is not JSON.
    pub body: Value,
    pub url: String,
    pub host: String,
    pub elapsed: Duration,
}

impl UpstreamReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct Simulator {
    upstream_url: String,
    client: reqwest::Client,
    timeout: Duration,
    settings: SimulatorConfig,
    namespace: Option<String>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("upstream_url", &self.upstream_url)
            .field("timeout", &self.timeout)
            .field("model_hosts", &self.settings.model_hosts)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl Simulator {
    pub fn new(config: &SimulatorConfig) -> Result<Self> {
        let upstream_url = config.upstream_url.trim().to_string();
        reqwest::Url::parse(&upstream_url)
            .map_err(|err| DashboardError::Config(format!("invalid simulator url: {err}")))?;
        Ok(Self {
            upstream_url,
            client: reqwest::Client::builder().build()?,
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
            settings: config.clone(),
            namespace: None,
            sequence: AtomicU64::new(0),
        })
    }

    /// Namespace stamped onto recorded requests.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub fn completions_url(&self) -> String {
        join_base_url(&self.upstream_url, CHAT_COMPLETIONS_PATH)
    }

    /// `x-model-host` override, else the configured host for the model, else the
    /// upstream's own authority.
    pub fn resolve_host(&self, request: &SimulatedRequest) -> String {
        if let Some(host) = request.host.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
            return host.to_string();
        }
        let configured = request
            .model()
            .and_then(|model| self.settings.model_hosts.get(model));
        if let Some(host) = configured {
            return host.clone();
        }
        upstream_authority(&self.upstream_url)
    }

    /// Sends the request upstream. Only transport failures are errors; any upstream
    /// status comes back as a reply.
    pub async fn forward(&self, request: &SimulatedRequest) -> Result<UpstreamReply> {
        let url = self.completions_url();
        let host = self.resolve_host(request);

        let mut headers = HeaderMap::new();
        headers.insert(HOST, header_value(&host, "host")?);
        if let Some(authorization) = request.authorization.as_deref() {
            headers.insert(AUTHORIZATION, header_value(authorization, "authorization")?);
        }

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .timeout(self.timeout)
            .json(&request.body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response_text_truncated(response, MAX_UPSTREAM_BODY_BYTES).await;
        let elapsed = started.elapsed();
        debug!(
            status,
            url = %url,
            host = %host,
            elapsed_ms = elapsed.as_millis() as u64,
            "simulator upstream replied"
        );

        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(UpstreamReply {
            status,
            body,
            url,
            host,
            elapsed,
        })
    }

    /// Builds the log entry for one simulated request. `reply = None` records a transport
    /// failure as a 502.
    pub fn record(
        &self,
        request: &SimulatedRequest,
        reply: Option<&UpstreamReply>,
    ) -> RequestLogEntry {
        let now = OffsetDateTime::now_utc();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let id = format!("sim-{}-{sequence}", now.unix_timestamp_nanos() / 1_000_000);
        let status = reply.map(|reply| reply.status).unwrap_or(502);

        let mut entry = RequestLogEntry::new(id, format_rfc3339(now), status);
        entry.method = "POST".to_string();
        entry.path = CHAT_COMPLETIONS_PATH.to_string();
        entry.source_ip = "simulator".to_string();
        entry.source = RequestSource::Simulator;
        entry.namespace = self.namespace.clone();
        entry.response_time = reply
            .map(|reply| reply.elapsed.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        if let Some(denial) = denial_for_status(status, None) {
            entry.policy_type = Some(denial.policy_type);
            entry.policy_decisions.push(denial);
        } else if (200..300).contains(&status) {
            entry.policy_decisions = allow_decisions();
        }
        entry.decision = Decision::from_status(status);

        entry.authentication = request
            .authorization
            .as_deref()
            .and_then(api_key)
            .map(|key| AuthenticationDetails {
                method: "api-key".to_string(),
                is_valid: !matches!(status, 401 | 403),
                tier: self.settings.tier_for_key(key).map(str::to_string),
                key_prefix: Some(mask_key(key)),
            });
        entry.model_inference = request
            .model()
            .map(|model| model_inference(model, reply.map(|reply| &reply.body)));
        entry
    }
}

fn allow_decisions() -> Vec<PolicyDecisionDetails> {
    vec![
        PolicyDecisionDetails {
            policy_id: "gateway-auth-policy".to_string(),
            policy_name: "gateway-auth-policy".to_string(),
            policy_type: PolicyType::AuthPolicy,
            decision: PolicyVerdict::Allow,
            enforcement_point: EnforcementPoint::Authorino,
            reason: "api key accepted".to_string(),
            processing_time: None,
        },
        PolicyDecisionDetails {
            policy_id: "gateway-rate-limits".to_string(),
            policy_name: "gateway-rate-limits".to_string(),
            policy_type: PolicyType::RateLimitPolicy,
            decision: PolicyVerdict::Allow,
            enforcement_point: EnforcementPoint::Limitador,
            reason: "within limits".to_string(),
            processing_time: None,
        },
    ]
}

fn model_inference(model: &str, body: Option<&Value>) -> ModelInferenceDetails {
    let usage = body.and_then(|body| body.get("usage"));
    let tokens = |key: &str| usage.and_then(|usage| usage.get(key)).and_then(Value::as_u64);
    ModelInferenceDetails {
        model: model.to_string(),
        prompt_tokens: tokens("prompt_tokens"),
        completion_tokens: tokens("completion_tokens"),
        total_tokens: tokens("total_tokens"),
        finish_reason: body
            .and_then(|body| body.pointer("/choices/0/finish_reason"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// `Bearer <key>` / `APIKEY <key>` / bare key.
fn api_key(authorization: &str) -> Option<&str> {
    authorization
        .split_whitespace()
        .last()
        .filter(|key| !key.is_empty())
}

fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(KEY_PREFIX_CHARS).collect();
    format!("{prefix}...")
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value.trim())
        .map_err(|_| DashboardError::Config(format!("invalid {name} header value")))
}

fn upstream_authority(upstream_url: &str) -> String {
    let Ok(url) = reqwest::Url::parse(upstream_url) else {
        return String::new();
    };
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn join_base_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = path.strip_prefix('/').unwrap_or(path);
    match (base.ends_with("/v1"), path.strip_prefix("v1/")) {
        (true, Some(rest)) => format!("{base}/{rest}"),
        _ => format!("{base}/{path}"),
    }
}
