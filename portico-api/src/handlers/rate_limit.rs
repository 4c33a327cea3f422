use crate::error::{ApiError, ApiResult};
use axum::extract::{Path, Query, State};
use axum::Json;
use portico_proxy::Gateway;
use portico_traffic::RateLimiter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

fn limiter(gateway: &Gateway) -> ApiResult<&Arc<RateLimiter>> {
    gateway
        .limiter
        .as_ref()
        .ok_or_else(|| ApiError::unavailable("Rate limiting is not enabled"))
}

/// GET /api/rate-limit/metrics
pub async fn metrics(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let limiter = limiter(&gateway)?;
    Ok(Json(json!(limiter.metrics())))
}

#[derive(Deserialize)]
pub struct BucketsQuery {
    pub limit: Option<usize>,
}

/// GET /api/rate-limit/buckets?limit=N
pub async fn buckets(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<BucketsQuery>,
) -> ApiResult<Json<Value>> {
    let limiter = limiter(&gateway)?;
    let mut buckets = limiter.active_buckets();
    if let Some(limit) = query.limit {
        buckets.truncate(limit);
    }
    Ok(Json(json!({ "buckets": buckets, "total": buckets.len() })))
}

/// DELETE /api/rate-limit/buckets/:key
pub async fn delete_bucket(
    State(gateway): State<Arc<Gateway>>,
    Path(key): Path<String>,
) -> ApiResult<Json<Value>> {
    let limiter = limiter(&gateway)?;
    let deleted = limiter.clear_bucket(&key);
    Ok(Json(json!({ "deleted": deleted, "key": key })))
}

/// POST /api/rate-limit/clear
pub async fn clear(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let limiter = limiter(&gateway)?;
    Ok(Json(json!({ "cleared": limiter.clear_all_buckets() })))
}
