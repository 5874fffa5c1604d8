use time::OffsetDateTime;
use tracing::warn;

use super::config::{ClusterConfig, LogConfig};
use super::kube::Cluster;
use super::logs::{any_pod_running, fetch_gateway_requests};
use super::types::ComponentStatus;
use crate::utils::clock::{format_rfc3339, now_rfc3339};

/// Health of the enforcement components plus whether any traffic is visible.
///
/// The three checks run concurrently and fail independently: a failed check reports
/// `false` (or zero live requests) for its own field only. `buffered_requests` counts
/// requests already recorded in-process (the simulator) and adds to the live count.
pub async fn component_status(
    cluster: &dyn Cluster,
    cluster_config: &ClusterConfig,
    log_config: &LogConfig,
    buffered_requests: usize,
    last_metrics_update: Option<OffsetDateTime>,
) -> ComponentStatus {
    let (limitador, authorino, live) = tokio::join!(
        any_pod_running(
            cluster,
            &cluster_config.kuadrant_namespace,
            &cluster_config.limitador_selector
        ),
        any_pod_running(
            cluster,
            &cluster_config.kuadrant_namespace,
            &cluster_config.authorino_selector
        ),
        fetch_gateway_requests(cluster, log_config),
    );

    let limitador = limitador.unwrap_or_else(|err| {
        warn!(error = %err, "limitador status check failed");
        false
    });
    let authorino = authorino.unwrap_or_else(|err| {
        warn!(error = %err, "authorino status check failed");
        false
    });
    let from_logs = live.map(|requests| requests.len()).unwrap_or_else(|err| {
        warn!(error = %err, "live request check failed");
        0
    });
    let live_request_count = from_logs + buffered_requests;

    ComponentStatus {
        limitador,
        authorino,
        live_requests: live_request_count > 0,
        live_request_count,
        last_metrics_update: last_metrics_update.map(format_rfc3339),
        timestamp: now_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::dashboard::kube::{LogOptions, PodSummary, ResourceRef};
    use crate::{DashboardError, Result};

    struct SelectiveCluster;

    #[async_trait]
    impl Cluster for SelectiveCluster {
        async fn list_pods(&self, _namespace: &str, selector: &str) -> Result<Vec<PodSummary>> {
            match selector {
                "app=limitador" => Ok(vec![PodSummary {
                    name: "limitador-0".to_string(),
                    namespace: "kuadrant-system".to_string(),
                    phase: Some("Running".to_string()),
                    ..PodSummary::default()
                }]),
                _ => Err(DashboardError::Api {
                    status: reqwest::StatusCode::FORBIDDEN,
                    body: "pods is forbidden".to_string(),
                }),
            }
        }

        async fn pod_logs(&self, _namespace: &str, _pod: &str, _options: &LogOptions) -> Result<String> {
            Ok(String::new())
        }

        async fn list_custom_objects(
            &self,
            _resource: &ResourceRef,
            _namespace: Option<&str>,
        ) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn each_check_fails_on_its_own() {
        let status = component_status(
            &SelectiveCluster,
            &ClusterConfig::default(),
            &LogConfig::default(),
            0,
            None,
        )
        .await;
        assert!(status.limitador);
        assert!(!status.authorino);
        assert!(!status.live_requests);
        assert_eq!(status.live_request_count, 0);
        assert!(status.last_metrics_update.is_none());
    }

    #[tokio::test]
    async fn buffered_requests_count_as_live_traffic() {
        let status = component_status(
            &SelectiveCluster,
            &ClusterConfig::default(),
            &LogConfig::default(),
            2,
            Some(OffsetDateTime::UNIX_EPOCH),
        )
        .await;
        assert!(status.live_requests);
        assert_eq!(status.live_request_count, 2);
        assert_eq!(
            status.last_metrics_update.as_deref(),
            Some("1970-01-01T00:00:00Z")
        );
    }
}
