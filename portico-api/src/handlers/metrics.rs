use crate::error::ApiResult;
use axum::extract::{Query, State};
use axum::Json;
use portico_proxy::Gateway;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/metrics/history?limit=N: newest first, `[]` without a KV.
pub async fn history(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let history = gateway
        .kv
        .metrics_history(query.limit.unwrap_or(100))
        .await;
    Ok(Json(json!({ "history": history, "total": history.len() })))
}

/// DELETE /api/metrics/history
pub async fn clear_history(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    gateway.kv.clear_metrics_history().await?;
    Ok(Json(json!({ "cleared": true })))
}
