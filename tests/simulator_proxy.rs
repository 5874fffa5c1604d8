#![cfg(feature = "server")]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use httpmock::Method::POST;
use httpmock::MockServer;
use maas_dashboard::dashboard::{
    Cluster, DashboardConfig, DashboardHttpState, LogOptions, MetricSample, MetricsSource,
    PodSummary, ResourceRef, router,
};
use maas_dashboard::utils::test_support::should_skip_httpmock;
use maas_dashboard::{DashboardError, Result};
use serde_json::{Value, json};
use tower::util::ServiceExt;

struct NoMetrics;

#[async_trait]
impl MetricsSource for NoMetrics {
    async fn query(&self, _promql: &str) -> Vec<MetricSample> {
        Vec::new()
    }
}

struct OfflineCluster;

#[async_trait]
impl Cluster for OfflineCluster {
    async fn list_pods(&self, _namespace: &str, _label_selector: &str) -> Result<Vec<PodSummary>> {
        Err(DashboardError::Config("offline".to_string()))
    }

    async fn pod_logs(&self, _namespace: &str, _pod: &str, _options: &LogOptions) -> Result<String> {
        Err(DashboardError::Config("offline".to_string()))
    }

    async fn list_custom_objects(
        &self,
        _resource: &ResourceRef,
        _namespace: Option<&str>,
    ) -> Result<Vec<Value>> {
        Err(DashboardError::Config("offline".to_string()))
    }
}

fn state_for(upstream_url: String) -> DashboardHttpState {
    let mut config = DashboardConfig::default();
    config.scrape.limitador_url = None;
    config.scrape.authorino_url = None;
    config.simulator.upstream_url = upstream_url;
    config
        .simulator
        .model_hosts
        .insert("qwen3".to_string(), "qwen3.maas.local".to_string());
    config
        .simulator
        .tier_keys
        .insert("premium".to_string(), "premium-key-123".to_string());
    DashboardHttpState::new(config, Arc::new(NoMetrics), Arc::new(OfflineCluster))
        .expect("state")
}

fn completion_request(uri: &str, body: Value, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(authorization) = authorization {
        builder = builder.header("authorization", authorization);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn forwards_with_model_host_and_records_the_request() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("host", "qwen3.maas.local")
            .header("authorization", "APIKEY premium-key-123");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "id": "chatcmpl-1",
                "choices": [{"finish_reason": "stop"}],
                "usage": {"prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10}
            }));
    });

    let state = state_for(upstream.base_url());
    let app = router(state.clone());
    let (status, body) = send(
        app.clone(),
        completion_request(
            "/api/v1/simulator/chat/completions",
            json!({"model": "qwen3", "messages": [{"role": "user", "content": "hi"}]}),
            Some("APIKEY premium-key-123"),
        ),
    )
    .await;
    mock.assert();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["id"], "chatcmpl-1");

    assert_eq!(state.buffer().lock().await.len(), 1);
    let live = send(
        app,
        Request::builder()
            .uri("/api/v1/metrics/live-requests")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .1;
    let entry = &live["data"][0];
    assert_eq!(entry["source"], "simulator");
    assert_eq!(entry["decision"], "accept");
    assert_eq!(entry["namespace"], "llm");
    assert_eq!(entry["authentication"]["tier"], "premium");
    assert_eq!(entry["authentication"]["keyPrefix"], "premiu...");
    assert_eq!(entry["modelInference"]["totalTokens"], 10);
}

#[tokio::test]
async fn upstream_rejection_keeps_status_and_details() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("host", "override.maas.local");
        then.status(429)
            .header("content-type", "application/json")
            .json_body(json!({"error": "Too Many Requests"}));
    });

    let state = state_for(format!("{}/v1", upstream.base_url()));
    let mut request = completion_request(
        "/chat/completions",
        json!({"model": "qwen3", "messages": []}),
        Some("APIKEY free-key"),
    );
    request
        .headers_mut()
        .insert("x-model-host", "override.maas.local".parse().unwrap());
    let (status, body) = send(router(state.clone()), request).await;
    mock.assert();

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["upstreamStatus"], 429);
    assert_eq!(body["data"]["upstreamBody"]["error"], "Too Many Requests");
    assert_eq!(body["data"]["hostHeader"], "override.maas.local");

    let recorded = state.buffer().lock().await.recent();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].is_rejected());
    assert_eq!(recorded[0].status_code, 429);
    assert_eq!(recorded[0].policy_decisions[0].policy_name, "gateway-rate-limits");
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0));
    let Ok(listener) = listener else {
        return;
    };
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let state = state_for(format!("http://{addr}"));
    let (status, body) = send(
        router(state.clone()),
        completion_request("/chat/completions", json!({"model": "other"}), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["hostHeader"], addr.to_string());
    assert!(body["data"].get("upstreamStatus").is_none());

    let recorded = state.buffer().lock().await.recent();
    assert_eq!(recorded[0].status_code, 502);
    assert!(recorded[0].authentication.is_none());
}

#[tokio::test]
async fn rejects_bodies_that_are_not_json_objects() {
    let state = state_for("http://127.0.0.1:9".to_string());
    let app = router(state.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/chat/completions")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(app, completion_request("/chat/completions", json!([1, 2]), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(state.buffer().lock().await.is_empty());
}

#[tokio::test]
async fn recorded_requests_are_capped() {
    if should_skip_httpmock() {
        return;
    }
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(401).body("unauthorized");
    });

    let state = state_for(upstream.base_url()).with_buffer_capacity(2);
    let app = router(state.clone());
    for _ in 0..3 {
        let (status, body) = send(
            app.clone(),
            completion_request("/chat/completions", json!({"model": "qwen3"}), Some("APIKEY bad")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["data"]["upstreamBody"], "unauthorized");
    }

    let buffer = state.buffer();
    let buffer = buffer.lock().await;
    assert_eq!(buffer.len(), 2);
    let recent = buffer.recent();
    assert!(recent[0].id.ends_with("-2"));
    assert_eq!(
        recent[0].authentication.as_ref().map(|auth| auth.is_valid),
        Some(false)
    );
}
