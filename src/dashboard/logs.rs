//! Gateway pod log tailing.

use tracing::{debug, warn};

use super::access_log::parse_source_logs;
use super::buffer::sort_newest_first;
use super::config::LogConfig;
use super::kube::{Cluster, LogOptions, PodSummary};
use super::types::RequestLogEntry;
use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodLogs {
    pub namespace: String,
    pub pod: String,
    pub text: String,
}

/// Lists the pods matching `selector` and tails each one concurrently. A pod whose logs
/// cannot be read is skipped; only a failed pod listing is an error.
pub async fn fetch_pod_logs(
    cluster: &dyn Cluster,
    namespace: &str,
    selector: &str,
    options: &LogOptions,
) -> Result<Vec<PodLogs>> {
    let pods = cluster.list_pods(namespace, selector).await?;
    debug!(namespace, selector, pods = pods.len(), "listed gateway pods");

    let results = futures_util::future::join_all(pods.into_iter().map(|pod| async move {
        let logs = cluster.pod_logs(&pod.namespace, &pod.name, options).await;
        (pod, logs)
    }))
    .await;

    let mut out = Vec::new();
    for (pod, logs) in results {
        match logs {
            Ok(text) => out.push(PodLogs {
                namespace: pod.namespace,
                pod: pod.name,
                text,
            }),
            Err(err) => {
                warn!(namespace = %pod.namespace, pod = %pod.name, error = %err, "pod log fetch failed");
            }
        }
    }
    Ok(out)
}

/// Recent gateway requests parsed from pod logs, newest first, capped at
/// `config.max_requests`.
pub async fn fetch_gateway_requests(
    cluster: &dyn Cluster,
    config: &LogConfig,
) -> Result<Vec<RequestLogEntry>> {
    let options = LogOptions {
        tail_lines: Some(config.tail_lines),
        since_seconds: Some(config.since_seconds),
        container: config.container.clone(),
    };
    let logs = fetch_pod_logs(
        cluster,
        &config.gateway_namespace,
        &config.gateway_selector,
        &options,
    )
    .await?;

    let mut requests = Vec::new();
    for pod_logs in logs {
        for mut entry in parse_source_logs(&pod_logs.text, &pod_logs.pod) {
            if entry.namespace.is_none() {
                entry.namespace = Some(pod_logs.namespace.clone());
            }
            entry.pod = Some(pod_logs.pod.clone());
            requests.push(entry);
        }
    }
    sort_newest_first(&mut requests);
    requests.truncate(config.max_requests);
    Ok(requests)
}

/// `true` when at least one pod matching `selector` reports phase `Running`.
pub async fn any_pod_running(cluster: &dyn Cluster, namespace: &str, selector: &str) -> Result<bool> {
    let pods = cluster.list_pods(namespace, selector).await?;
    Ok(pods.iter().any(PodSummary::is_running))
}
