//! Merges the metric, log and status sources into the views the dashboard serves.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use super::aggregate::{AggregatedCounts, MetricSets, aggregate, aggregate_requests};
use super::buffer::{RequestBuffer, merge_recent};
use super::config::{DashboardConfig, MetricQueries};
use super::kube::Cluster;
use super::logs::fetch_gateway_requests;
use super::policies::list_all_policies;
use super::prometheus::MetricsSource;
use super::scrape::{ComponentScraper, sum_family, sum_family_by};
use super::status::component_status;
use super::types::{
    ComponentStatus, DashboardSummary, NamespaceCounts, RequestLogEntry, SummarySource,
};
use crate::utils::clock::{format_rfc3339, now_rfc3339};

/// When the metrics path last returned data. Shared across requests.
#[derive(Clone, Debug, Default)]
pub struct LastMetricsUpdate(Arc<Mutex<Option<OffsetDateTime>>>);

impl LastMetricsUpdate {
    pub fn get(&self) -> Option<OffsetDateTime> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mark(&self, at: OffsetDateTime) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }
}

/// `^\d+[smhdw]$`
pub fn is_valid_time_range(range: &str) -> bool {
    let Some(unit) = range.chars().last() else {
        return false;
    };
    let digits = &range[..range.len() - unit.len_utf8()];
    matches!(unit, 's' | 'm' | 'h' | 'd' | 'w')
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeMetrics {
    pub time_range: String,
    pub namespace: String,
    pub total_requests: u64,
    pub accepted_requests: u64,
    pub rejected_requests: u64,
    pub auth_failed_requests: u64,
    pub rate_limited_requests: u64,
    pub namespace_breakdown: BTreeMap<String, NamespaceCounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_metrics_update: Option<String>,
    pub timestamp: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyKindStats {
    pub total: usize,
    pub active: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitadorStats {
    pub limited_calls: f64,
    pub authorized_calls: f64,
    pub limited_by_limit: BTreeMap<String, f64>,
    pub limited_by_namespace: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorinoStats {
    pub evaluations: f64,
    pub responses_by_status: BTreeMap<String, f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStats {
    pub total_policies: usize,
    pub active_policies: usize,
    pub by_kind: BTreeMap<String, PolicyKindStats>,
    pub recent_requests: AggregatedCounts,
    pub limitador: LimitadorStats,
    pub authorino: AuthorinoStats,
    pub timestamp: String,
}

/// Borrowed view over the shared dashboard state, built per request.
pub struct Assembler<'a> {
    pub config: &'a DashboardConfig,
    pub metrics: &'a dyn MetricsSource,
    pub cluster: &'a dyn Cluster,
    pub scraper: &'a ComponentScraper,
    pub buffer: &'a AsyncMutex<RequestBuffer>,
    pub last_update: &'a LastMetricsUpdate,
}

impl Assembler<'_> {
    /// Runs the three dashboard queries concurrently for `range`.
    pub async fn metric_sets(&self, range: &str) -> MetricSets {
        let namespace = &self.config.cluster.namespace;
        let queries = &self.config.prometheus.queries;
        let total = MetricQueries::render(&queries.total_requests, namespace, range);
        let auth = MetricQueries::render(&queries.auth_rejections, namespace, range);
        let rate_limit = MetricQueries::render(&queries.rate_limit_results, namespace, range);

        let (total, auth, rate_limit) = tokio::join!(
            self.metrics.query(&total),
            self.metrics.query(&auth),
            self.metrics.query(&rate_limit),
        );
        let sets = MetricSets {
            total,
            auth,
            rate_limit,
        };
        if !(sets.total.is_empty() && sets.auth.is_empty() && sets.rate_limit.is_empty()) {
            self.last_update.mark(OffsetDateTime::now_utc());
        }
        sets
    }

    pub async fn metric_counts(&self, range: &str) -> AggregatedCounts {
        aggregate(&self.metric_sets(range).await)
    }

    pub async fn range_metrics(&self, range: &str) -> RangeMetrics {
        let counts = self.metric_counts(range).await;
        RangeMetrics {
            time_range: range.to_string(),
            namespace: self.config.cluster.namespace.clone(),
            total_requests: counts.total,
            accepted_requests: counts.accepted,
            rejected_requests: counts.rejected,
            auth_failed_requests: counts.auth_failed,
            rate_limited_requests: counts.rate_limited,
            namespace_breakdown: counts.by_namespace,
            last_metrics_update: self.last_update.get().map(format_rfc3339),
            timestamp: now_rfc3339(),
        }
    }

    /// Simulator-recorded requests merged with gateway log requests. A failed log fetch
    /// leaves only the recorded ones.
    pub async fn live_requests(&self) -> Vec<RequestLogEntry> {
        let from_logs = fetch_gateway_requests(self.cluster, &self.config.logs)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "gateway log fetch failed");
                Vec::new()
            });
        let recorded = self.buffer.lock().await.recent();
        merge_recent(recorded, from_logs, self.config.logs.max_requests)
    }

    pub async fn find_request(&self, id: &str) -> Option<RequestLogEntry> {
        if let Some(entry) = self.buffer.lock().await.find(id) {
            return Some(entry);
        }
        self.live_requests()
            .await
            .into_iter()
            .find(|entry| entry.id == id)
    }

    pub async fn status(&self) -> ComponentStatus {
        let buffered = self.buffer.lock().await.len();
        component_status(
            self.cluster,
            &self.config.cluster,
            &self.config.logs,
            buffered,
            self.last_update.get(),
        )
        .await
    }

    /// Metrics, live requests and status are gathered concurrently. When the metrics path
    /// reports no traffic the counts come from the live requests instead.
    pub async fn dashboard(&self) -> DashboardSummary {
        let range = self.config.prometheus.dashboard_range.as_str();
        let (metrics, live, component_status) =
            tokio::join!(self.metric_counts(range), self.live_requests(), self.status());

        let (counts, source) = if metrics.total == 0 {
            debug!(live = live.len(), "metrics empty; using live requests");
            (aggregate_requests(&live), SummarySource::LiveRequestsFallback)
        } else {
            (metrics, SummarySource::PrometheusMetrics)
        };

        DashboardSummary {
            total_requests: counts.total,
            accepted_requests: counts.accepted,
            rejected_requests: counts.rejected,
            auth_failed_requests: counts.auth_failed,
            rate_limited_requests: counts.rate_limited,
            namespace_breakdown: counts.by_namespace,
            source,
            component_status,
            last_metrics_update: self.last_update.get().map(format_rfc3339),
            timestamp: now_rfc3339(),
        }
    }

    pub async fn policy_stats(&self) -> PolicyStats {
        let (policies, live, limitador, authorino) = tokio::join!(
            list_all_policies(self.cluster, &self.config.cluster.namespace),
            self.live_requests(),
            self.scraper.limitador(),
            self.scraper.authorino(),
        );

        let mut by_kind = BTreeMap::<String, PolicyKindStats>::new();
        for policy in &policies {
            let stats = by_kind.entry(policy.kind.plural().to_string()).or_default();
            stats.total += 1;
            if policy.is_active {
                stats.active += 1;
            }
        }

        PolicyStats {
            total_policies: policies.len(),
            active_policies: policies.iter().filter(|policy| policy.is_active).count(),
            by_kind,
            recent_requests: aggregate_requests(&live),
            limitador: LimitadorStats {
                limited_calls: sum_family(&limitador, "limited_calls"),
                authorized_calls: sum_family(&limitador, "authorized_calls"),
                limited_by_limit: sum_family_by(&limitador, "limited_calls", "limit_name"),
                limited_by_namespace: sum_family_by(
                    &limitador,
                    "limited_calls",
                    "limitador_namespace",
                ),
            },
            authorino: AuthorinoStats {
                evaluations: sum_family(&authorino, "auth_server_authconfig_total"),
                responses_by_status: sum_family_by(
                    &authorino,
                    "auth_server_authconfig_response_status",
                    "status",
                ),
            },
            timestamp: now_rfc3339(),
        }
    }
}
