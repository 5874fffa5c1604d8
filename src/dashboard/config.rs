use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{DashboardError, Env, Result};

pub const DEFAULT_NAMESPACE: &str = "llm";
pub const DEFAULT_KUADRANT_NAMESPACE: &str = "kuadrant-system";
pub const DEFAULT_REQUEST_BUFFER_CAPACITY: usize = 100;

/// Tiers the simulator knows API keys for (`REACT_APP_<TIER>_API_KEY`).
pub const KNOWN_TIERS: &[&str] = &["free", "premium", "enterprise"];

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub listen: Option<String>,
    pub prometheus: PrometheusConfig,
    pub cluster: ClusterConfig,
    pub logs: LogConfig,
    pub scrape: ScrapeConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Tried in order; the first endpoint answering with `status: success` wins.
    pub endpoints: Vec<String>,
    pub bearer_token: Option<String>,
    pub timeout_seconds: u64,
    pub insecure_skip_tls_verify: bool,
    /// Range used by the dashboard summary when the caller does not pick one.
    pub dashboard_range: String,
    pub queries: MetricQueries,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "http://thanos-querier.openshift-monitoring.svc.cluster.local:9091".to_string(),
                "http://prometheus-k8s.openshift-monitoring.svc.cluster.local:9091".to_string(),
                "http://prometheus-operated.monitoring.svc.cluster.local:9090".to_string(),
            ],
            bearer_token: None,
            timeout_seconds: 5,
            insecure_skip_tls_verify: false,
            dashboard_range: "1h".to_string(),
            queries: MetricQueries::default(),
        }
    }
}

impl std::fmt::Debug for PrometheusConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusConfig")
            .field("endpoints", &self.endpoints)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .field("timeout_seconds", &self.timeout_seconds)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("dashboard_range", &self.dashboard_range)
            .field("queries", &self.queries)
            .finish()
    }
}

/// PromQL templates. `{namespace}` and `{range}` are substituted before each query.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricQueries {
    pub total_requests: String,
    pub auth_rejections: String,
    pub rate_limit_results: String,
}

impl Default for MetricQueries {
    fn default() -> Self {
        Self {
            total_requests: r#"sum by (namespace) (increase(istio_requests_total{namespace="{namespace}"}[{range}]))"#
                .to_string(),
            auth_rejections: r#"sum by (namespace, status_code) (label_replace(increase(istio_requests_total{namespace="{namespace}",response_code="401"}[{range}]), "status_code", "$1", "response_code", "(.*)"))"#
                .to_string(),
            rate_limit_results: r#"sum by (namespace, result) (label_replace(increase(istio_requests_total{namespace="{namespace}",response_code="429"}[{range}]), "result", "over_limit", "response_code", "429"))"#
                .to_string(),
        }
    }
}

impl MetricQueries {
    pub fn render(template: &str, namespace: &str, range: &str) -> String {
        template
            .replace("{namespace}", namespace)
            .replace("{range}", range)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Explicit API server URL; otherwise in-cluster, then kubeconfig.
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub insecure_skip_tls_verify: bool,
    pub timeout_seconds: u64,
    /// Namespace policies are read from before falling back to cluster scope.
    pub namespace: String,
    pub kuadrant_namespace: String,
    pub limitador_selector: String,
    pub authorino_selector: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            token: None,
            kubeconfig: None,
            insecure_skip_tls_verify: false,
            timeout_seconds: 10,
            namespace: DEFAULT_NAMESPACE.to_string(),
            kuadrant_namespace: DEFAULT_KUADRANT_NAMESPACE.to_string(),
            limitador_selector: "app=limitador".to_string(),
            authorino_selector: "authorino-resource=authorino".to_string(),
        }
    }
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("kubeconfig", &self.kubeconfig)
            .field("insecure_skip_tls_verify", &self.insecure_skip_tls_verify)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("namespace", &self.namespace)
            .field("kuadrant_namespace", &self.kuadrant_namespace)
            .field("limitador_selector", &self.limitador_selector)
            .field("authorino_selector", &self.authorino_selector)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub gateway_namespace: String,
    pub gateway_selector: String,
    pub container: Option<String>,
    pub tail_lines: u32,
    pub since_seconds: u64,
    /// Cap on the recent-request list served to the dashboard.
    pub max_requests: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            gateway_namespace: "openshift-ingress".to_string(),
            gateway_selector: "gateway.networking.k8s.io/gateway-name=maas-default-gateway"
                .to_string(),
            container: None,
            tail_lines: 100,
            since_seconds: 3600,
            max_requests: DEFAULT_REQUEST_BUFFER_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub limitador_url: Option<String>,
    pub authorino_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            limitador_url: Some(
                "http://limitador-limitador.kuadrant-system.svc.cluster.local:8080/metrics"
                    .to_string(),
            ),
            authorino_url: Some(
                "http://authorino-controller-metrics.kuadrant-system.svc.cluster.local:8080/metrics"
                    .to_string(),
            ),
            timeout_seconds: 5,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub upstream_url: String,
    pub timeout_seconds: u64,
    /// `model name -> Host header` for tenant routing at the gateway.
    pub model_hosts: BTreeMap<String, String>,
    /// `tier -> API key`, used to label simulated requests with their tier.
    pub tier_keys: BTreeMap<String, String>,
    pub buffer_capacity: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            upstream_url: "http://localhost:8080".to_string(),
            timeout_seconds: 60,
            model_hosts: BTreeMap::new(),
            tier_keys: BTreeMap::new(),
            buffer_capacity: DEFAULT_REQUEST_BUFFER_CAPACITY,
        }
    }
}

impl std::fmt::Debug for SimulatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<&str> = self.tier_keys.keys().map(String::as_str).collect();
        f.debug_struct("SimulatorConfig")
            .field("upstream_url", &self.upstream_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("model_hosts", &self.model_hosts)
            .field("tier_keys", &tiers)
            .field("buffer_capacity", &self.buffer_capacity)
            .finish()
    }
}

impl SimulatorConfig {
    pub fn tier_for_key(&self, key: &str) -> Option<&str> {
        self.tier_keys
            .iter()
            .find(|(_, configured)| configured.as_str() == key)
            .map(|(tier, _)| tier.as_str())
    }
}

impl DashboardConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(serde_json::from_str(&raw)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&raw)?),
            _ => Self::from_toml_str(&raw),
        }
    }

    /// Overlays environment variables onto the loaded configuration.
    pub fn apply_env(&mut self, env: &Env) {
        if let Some(namespace) = env.get("NAMESPACE") {
            self.cluster.namespace = namespace;
        }
        if let Some(namespace) = env.get("KUADRANT_NAMESPACE") {
            self.cluster.kuadrant_namespace = namespace;
        }
        if let Some(url) = env.get("KUBE_API_URL") {
            self.cluster.api_url = Some(url);
        }
        if let Some(token) = env.get("KUBE_TOKEN") {
            self.cluster.token = Some(token);
        }
        if let Some(path) = env.get("KUBECONFIG") {
            self.cluster.kubeconfig = Some(PathBuf::from(path));
        }

        if let Some(endpoints) = env.get_list("PROMETHEUS_URLS") {
            self.prometheus.endpoints = endpoints;
        }
        if let Some(token) = env.get("PROMETHEUS_TOKEN") {
            self.prometheus.bearer_token = Some(token);
        }

        if let Some(namespace) = env.get("GATEWAY_NAMESPACE") {
            self.logs.gateway_namespace = namespace;
        }
        if let Some(selector) = env.get("GATEWAY_LABEL_SELECTOR") {
            self.logs.gateway_selector = selector;
        }
        if let Some(tail_lines) = env.get_parsed::<u32>("LOG_TAIL_LINES") {
            self.logs.tail_lines = tail_lines;
        }

        if let Some(url) = env.get("LIMITADOR_METRICS_URL") {
            self.scrape.limitador_url = Some(url);
        }
        if let Some(url) = env.get("AUTHORINO_METRICS_URL") {
            self.scrape.authorino_url = Some(url);
        }

        if let Some(url) = env.first_of(&["SIMULATOR_URL", "KUADRANT_GATEWAY_URL", "QWEN3_URL"]) {
            self.simulator.upstream_url = url;
        }
        if let Some(hosts) = env.get_pairs("MODEL_HOSTS") {
            self.simulator.model_hosts.extend(hosts);
        }
        for tier in KNOWN_TIERS {
            let key = format!("REACT_APP_{}_API_KEY", tier.to_ascii_uppercase());
            if let Some(api_key) = env.get(&key) {
                self.simulator.tier_keys.insert((*tier).to_string(), api_key);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.prometheus.endpoints.is_empty() {
            return Err(DashboardError::Config(
                "at least one prometheus endpoint is required".to_string(),
            ));
        }
        if self.cluster.namespace.trim().is_empty() {
            return Err(DashboardError::Config("namespace must not be empty".to_string()));
        }
        if self.simulator.upstream_url.trim().is_empty() {
            return Err(DashboardError::Config(
                "simulator upstream url must not be empty".to_string(),
            ));
        }
        if self.logs.max_requests == 0 || self.simulator.buffer_capacity == 0 {
            return Err(DashboardError::Config(
                "request caps must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
