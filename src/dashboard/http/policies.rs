async fn all_policies(
    State(state): State<DashboardHttpState>,
) -> Json<ApiEnvelope<Vec<super::types::KuadrantPolicy>>> {
    let namespace = &state.config.cluster.namespace;
    ok(list_all_policies(state.cluster.as_ref(), namespace).await)
}

async fn policies_by_kind(
    State(state): State<DashboardHttpState>,
    Path(kind): Path<String>,
) -> Result<Json<ApiEnvelope<Vec<super::types::KuadrantPolicy>>>, ApiError> {
    let Some(kind) = PolicyKind::from_plural(&kind) else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("unknown policy kind: {kind}"),
        ));
    };
    let namespace = &state.config.cluster.namespace;
    Ok(ok(list_policies(state.cluster.as_ref(), kind, namespace).await))
}
