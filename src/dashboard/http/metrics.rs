#[derive(Debug, Deserialize)]
struct TimeRangeQuery {
    #[serde(default, rename = "timeRange")]
    time_range: Option<String>,
}

async fn metrics_for_range(
    State(state): State<DashboardHttpState>,
    Query(query): Query<TimeRangeQuery>,
) -> Result<Json<ApiEnvelope<super::assembler::RangeMetrics>>, ApiError> {
    let range = query
        .time_range
        .as_deref()
        .map(str::trim)
        .filter(|range| !range.is_empty())
        .unwrap_or(DEFAULT_TIME_RANGE);
    if !is_valid_time_range(range) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid timeRange {range:?}: expected e.g. 30m, 1h, 7d"),
        ));
    }
    Ok(ok(state.assembler().range_metrics(range).await))
}

async fn live_requests(
    State(state): State<DashboardHttpState>,
) -> Json<ApiEnvelope<Vec<super::types::RequestLogEntry>>> {
    ok(state.assembler().live_requests().await)
}

async fn request_by_id(
    State(state): State<DashboardHttpState>,
    Path(id): Path<String>,
) -> Result<Json<ApiEnvelope<super::types::RequestLogEntry>>, ApiError> {
    match state.assembler().find_request(&id).await {
        Some(entry) => Ok(ok(entry)),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("request not found: {id}"),
        )),
    }
}

async fn policy_stats(
    State(state): State<DashboardHttpState>,
) -> Json<ApiEnvelope<super::assembler::PolicyStats>> {
    ok(state.assembler().policy_stats().await)
}

async fn dashboard(
    State(state): State<DashboardHttpState>,
) -> Json<ApiEnvelope<super::types::DashboardSummary>> {
    ok(state.assembler().dashboard().await)
}
