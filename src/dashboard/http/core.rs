use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{Instrument as _, info, warn};

use super::assembler::{Assembler, LastMetricsUpdate, is_valid_time_range};
use super::buffer::RequestBuffer;
use super::config::DashboardConfig;
use super::kube::{Cluster, KubeClient, UnavailableCluster};
use super::policies::{list_all_policies, list_policies};
use super::prometheus::{MetricsSource, PrometheusClient};
use super::scrape::ComponentScraper;
use super::simulator::{SimulatedRequest, Simulator};
use super::types::PolicyKind;
use crate::utils::clock::now_rfc3339;

const DEFAULT_TIME_RANGE: &str = "1h";
const MAX_SIMULATOR_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct DashboardHttpState {
    config: Arc<DashboardConfig>,
    metrics: Arc<dyn MetricsSource>,
    cluster: Arc<dyn Cluster>,
    scraper: Arc<ComponentScraper>,
    simulator: Option<Arc<Simulator>>,
    buffer: Arc<Mutex<RequestBuffer>>,
    last_update: LastMetricsUpdate,
}

impl DashboardHttpState {
    /// State over explicit data sources. The scraper and simulator come from `config`; a
    /// simulator that cannot be built leaves the simulator routes answering 503.
    pub fn new(
        config: DashboardConfig,
        metrics: Arc<dyn MetricsSource>,
        cluster: Arc<dyn Cluster>,
    ) -> crate::Result<Self> {
        let scraper = ComponentScraper::new(&config.scrape)?;
        let simulator = match Simulator::new(&config.simulator) {
            Ok(simulator) => Some(Arc::new(
                simulator.with_namespace(config.cluster.namespace.clone()),
            )),
            Err(err) => {
                warn!(error = %err, "request simulator disabled");
                None
            }
        };
        let buffer = RequestBuffer::new(config.simulator.buffer_capacity);
        Ok(Self {
            config: Arc::new(config),
            metrics,
            cluster,
            scraper: Arc::new(scraper),
            simulator,
            buffer: Arc::new(Mutex::new(buffer)),
            last_update: LastMetricsUpdate::default(),
        })
    }

    /// Builds the live clients. Missing Kubernetes credentials do not fail startup: the
    /// cluster-backed sources report empty instead.
    pub fn from_config(config: DashboardConfig) -> crate::Result<Self> {
        let (cluster, cluster_token): (Arc<dyn Cluster>, Option<String>) =
            match KubeClient::from_config(&config.cluster) {
                Ok(client) => {
                    info!(api_url = %client.api_url(), "kubernetes client ready");
                    let token = client.token().map(str::to_string);
                    (Arc::new(client), token)
                }
                Err(err) => {
                    warn!(error = %err, "kubernetes client unavailable");
                    (Arc::new(UnavailableCluster::new(err.to_string())), None)
                }
            };
        let metrics =
            PrometheusClient::new(&config.prometheus)?.with_bearer_token(cluster_token);
        Self::new(config, Arc::new(metrics), cluster)
    }

    pub fn with_scraper(mut self, scraper: ComponentScraper) -> Self {
        self.scraper = Arc::new(scraper);
        self
    }

    pub fn with_simulator(mut self, simulator: Simulator) -> Self {
        self.simulator = Some(Arc::new(simulator));
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer = Arc::new(Mutex::new(RequestBuffer::new(capacity)));
        self
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn buffer(&self) -> Arc<Mutex<RequestBuffer>> {
        self.buffer.clone()
    }

    pub fn last_metrics_update(&self) -> &LastMetricsUpdate {
        &self.last_update
    }

    fn assembler(&self) -> Assembler<'_> {
        Assembler {
            config: &self.config,
            metrics: self.metrics.as_ref(),
            cluster: self.cluster.as_ref(),
            scraper: &self.scraper,
            buffer: &self.buffer,
            last_update: &self.last_update,
        }
    }
}

/// `{success, data?, error?, timestamp}` wrapper used by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

type ApiError = (StatusCode, Json<ApiEnvelope<Value>>);

fn ok<T: Serialize>(data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope {
        success: true,
        data: Some(data),
        error: None,
        timestamp: now_rfc3339(),
    })
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    error_with_data(status, message, None)
}

fn error_with_data(
    status: StatusCode,
    message: impl Into<String>,
    data: Option<Value>,
) -> ApiError {
    (
        status,
        Json(ApiEnvelope {
            success: false,
            data,
            error: Some(message.into()),
            timestamp: now_rfc3339(),
        }),
    )
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    namespace: String,
    simulator: bool,
}

pub fn router(state: DashboardHttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/metrics", get(metrics_for_range))
        .route("/api/v1/metrics/", get(metrics_for_range))
        .route("/api/v1/metrics/live-requests", get(live_requests))
        .route("/api/v1/metrics/requests/:id", get(request_by_id))
        .route("/api/v1/metrics/policy-stats", get(policy_stats))
        .route("/api/v1/metrics/dashboard", get(dashboard))
        .route("/api/v1/policies", get(all_policies))
        .route("/api/v1/policies/:kind", get(policies_by_kind))
        .route(
            "/api/v1/simulator/chat/completions",
            post(simulate_chat_completion),
        )
        .route("/chat/completions", post(simulate_chat_completion))
        .fallback(handle_fallback)
        .with_state(state)
}

async fn health(State(state): State<DashboardHttpState>) -> Json<ApiEnvelope<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        namespace: state.config.cluster.namespace.clone(),
        simulator: state.simulator.is_some(),
    })
}

async fn handle_fallback() -> ApiError {
    error_response(StatusCode::NOT_FOUND, "route not found")
}
