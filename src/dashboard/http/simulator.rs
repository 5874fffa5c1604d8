#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamFailure<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upstream_body: Option<&'a Value>,
    upstream_url: &'a str,
    host_header: &'a str,
}

async fn simulate_chat_completion(
    State(state): State<DashboardHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(simulator) = state.simulator.clone() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "request simulator is not configured",
        )
        .into_response();
    };
    if body.len() > MAX_SIMULATOR_BODY_BYTES {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
            .into_response();
    }
    let body: Value = match serde_json::from_slice(&body) {
        Ok(body @ Value::Object(_)) => body,
        Ok(_) => {
            return error_response(StatusCode::BAD_REQUEST, "request body must be a JSON object")
                .into_response();
        }
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON body: {err}"))
                .into_response();
        }
    };

    let request = SimulatedRequest {
        body,
        authorization: extract_header(&headers, "authorization"),
        host: extract_header(&headers, "x-model-host"),
    };
    let span = tracing::info_span!(
        "simulator.chat_completions",
        model = tracing::field::Empty,
        host = tracing::field::Empty,
        status = tracing::field::Empty,
    );
    if let Some(model) = request.model() {
        span.record("model", model);
    }

    async move {
        let host = simulator.resolve_host(&request);
        tracing::Span::current().record("host", host.as_str());

        let result = simulator.forward(&request).await;
        let entry = simulator.record(&request, result.as_ref().ok());
        let entry_id = entry.id.clone();
        state.buffer.lock().await.push(entry);

        match result {
            Ok(reply) if reply.is_success() => {
                tracing::Span::current().record("status", reply.status);
                info!(request_id = %entry_id, "simulated request succeeded");
                ok(reply.body).into_response()
            }
            Ok(reply) => {
                tracing::Span::current().record("status", reply.status);
                info!(
                    request_id = %entry_id,
                    status = reply.status,
                    "simulated request rejected upstream"
                );
                let status =
                    StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
                let data = UpstreamFailure {
                    upstream_status: Some(reply.status),
                    upstream_body: Some(&reply.body),
                    upstream_url: &reply.url,
                    host_header: &reply.host,
                };
                error_with_data(
                    status,
                    format!("upstream returned {}", reply.status),
                    serde_json::to_value(&data).ok(),
                )
                .into_response()
            }
            Err(err) => {
                tracing::Span::current().record("status", StatusCode::BAD_GATEWAY.as_u16());
                warn!(request_id = %entry_id, error = %err, "simulator upstream unreachable");
                let url = simulator.completions_url();
                let data = UpstreamFailure {
                    upstream_status: None,
                    upstream_body: None,
                    upstream_url: &url,
                    host_header: &host,
                };
                error_with_data(
                    StatusCode::BAD_GATEWAY,
                    format!("upstream request failed: {err}"),
                    serde_json::to_value(&data).ok(),
                )
                .into_response()
            }
        }
    }
    .instrument(span)
    .await
}
