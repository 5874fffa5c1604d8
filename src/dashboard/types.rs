use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One labeled scalar from a Prometheus result vector or a scraped text exposition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(value: f64) -> Self {
        Self {
            labels: BTreeMap::new(),
            value,
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn from_status(status_code: u16) -> Self {
        if status_code < 400 {
            Self::Accept
        } else {
            Self::Reject
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PolicyType {
    AuthPolicy,
    RateLimitPolicy,
    ContentPolicy,
    CostPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyVerdict {
    Allow,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementPoint {
    Authorino,
    Limitador,
    Envoy,
    Opa,
    Kuadrant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecisionDetails {
    pub policy_id: String,
    pub policy_name: String,
    pub policy_type: PolicyType,
    pub decision: PolicyVerdict,
    pub enforcement_point: EnforcementPoint,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationDetails {
    pub method: String,
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInferenceDetails {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestSource {
    GatewayLogs,
    Simulator,
}

/// A single proxied request, normalized from a log line or recorded by the simulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    /// Milliseconds.
    pub response_time: f64,
    pub source_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<PolicyType>,
    #[serde(default)]
    pub policy_decisions: Vec<PolicyDecisionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_inference: Option<ModelInferenceDetails>,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    pub source: RequestSource,
}

impl RequestLogEntry {
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>, status_code: u16) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            method: "GET".to_string(),
            path: "/".to_string(),
            status_code,
            response_time: 0.0,
            source_ip: "unknown".to_string(),
            policy_type: None,
            policy_decisions: Vec::new(),
            authentication: None,
            model_inference: None,
            decision: Decision::from_status(status_code),
            namespace: None,
            pod: None,
            source: RequestSource::GatewayLogs,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.decision == Decision::Reject
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummarySource {
    PrometheusMetrics,
    LiveRequestsFallback,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceCounts {
    pub total: u64,
    pub success: u64,
    pub auth_failed: u64,
    pub rate_limited: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub limitador: bool,
    pub authorino: bool,
    pub live_requests: bool,
    pub live_request_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_metrics_update: Option<String>,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_requests: u64,
    pub accepted_requests: u64,
    pub rejected_requests: u64,
    pub auth_failed_requests: u64,
    pub rate_limited_requests: u64,
    pub namespace_breakdown: BTreeMap<String, NamespaceCounts>,
    pub source: SummarySource,
    pub component_status: ComponentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_metrics_update: Option<String>,
    pub timestamp: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PolicyKind {
    AuthPolicy,
    RateLimitPolicy,
    TokenRateLimitPolicy,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// One flattened sub-rule of a policy, for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyItem {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KuadrantPolicy {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub kind: PolicyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<TargetRef>,
    pub spec: Value,
    pub conditions: Vec<PolicyCondition>,
    pub is_active: bool,
    pub items: Vec<PolicyItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_threshold_is_400() {
        assert_eq!(Decision::from_status(399), Decision::Accept);
        assert_eq!(Decision::from_status(400), Decision::Reject);
        assert_eq!(Decision::from_status(0), Decision::Accept);
    }

    #[test]
    fn request_entry_serializes_camel_case() {
        let mut entry = RequestLogEntry::new("abc", "2024-01-01T00:00:00Z", 401);
        entry.policy_type = Some(PolicyType::AuthPolicy);
        let json = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["decision"], "reject");
        assert_eq!(json["policyType"], "AuthPolicy");
        assert_eq!(json["source"], "gateway-logs");
        assert!(json.get("modelInference").is_none());
    }

    #[test]
    fn summary_source_tags_match_dashboard_contract() {
        assert_eq!(
            serde_json::to_value(SummarySource::LiveRequestsFallback).expect("serialize"),
            "live-requests-fallback"
        );
        assert_eq!(
            serde_json::to_value(SummarySource::PrometheusMetrics).expect("serialize"),
            "prometheus-metrics"
        );
    }
}
