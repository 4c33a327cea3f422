use crate::error::ApiResult;
use axum::extract::{Query, State};
use axum::Json;
use portico_observability::LogFilter;
use portico_proxy::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/logs?ip&rateLimited&statusRange&limit: filtered, newest first.
pub async fn query(
    State(gateway): State<Arc<Gateway>>,
    Query(filter): Query<LogFilter>,
) -> ApiResult<Json<Value>> {
    let entries = gateway.log.filter(&filter);
    Ok(Json(json!({ "logs": entries, "total": entries.len() })))
}

/// DELETE /api/logs
pub async fn clear(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    gateway.log.clear();
    Ok(Json(json!({ "cleared": true })))
}

/// GET /api/logs/stats
pub async fn stats(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    Ok(Json(json!(gateway.log.stats())))
}
