//! Dashboard backend for a Kuadrant-protected Models-as-a-Service gateway.
//!
//! Three unreliable sources feed one view: the Prometheus query API, gateway pod logs and
//! the Limitador/Authorino `/metrics` endpoints. Every source degrades to empty on its own.

pub mod access_log;
pub mod aggregate;
pub mod assembler;
pub mod buffer;
pub mod config;
pub mod kube;
pub mod logs;
pub mod policies;
pub mod prometheus;
pub mod scrape;
pub mod simulator;
pub mod status;
pub mod telemetry;
pub mod types;

#[cfg(feature = "server")]
pub mod http;

pub use aggregate::{AggregatedCounts, MetricSets, aggregate, aggregate_requests};
pub use assembler::{Assembler, LastMetricsUpdate, PolicyStats, RangeMetrics};
pub use buffer::RequestBuffer;
pub use config::{
    ClusterConfig, DashboardConfig, LogConfig, MetricQueries, PrometheusConfig, ScrapeConfig,
    SimulatorConfig,
};
pub use kube::{Cluster, KubeClient, KubeCredentials, LogOptions, PodSummary, ResourceRef};
pub use prometheus::{MetricsSource, PrometheusClient};
pub use scrape::ComponentScraper;
pub use simulator::{SimulatedRequest, Simulator, UpstreamReply};
pub use types::{
    ComponentStatus, DashboardSummary, Decision, KuadrantPolicy, MetricSample, PolicyKind,
    RequestLogEntry, SummarySource,
};

#[cfg(feature = "server")]
pub use http::{ApiEnvelope, DashboardHttpState, router};
