use crate::error::ApiResult;
use crate::handlers::{cors_config_json, rate_limit_config_json};
use axum::extract::State;
use axum::Json;
use portico_proxy::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/config: the merged, read-only runtime configuration.
pub async fn config(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let cfg = &gateway.config;
    Ok(Json(json!({
        "listenAddr": cfg.listen_addr,
        "apiBase": cfg.api_base,
        "rateLimit": cfg.rate_limit.as_ref().map(rate_limit_config_json),
        "cors": cfg.cors.as_ref().map(cors_config_json),
        "cache": { "enabled": cfg.cache.enabled },
        "shell": {
            "dir": cfg.shell.dir,
            "envExcludes": cfg.shell.excludes,
        },
        "etcd": { "enabled": gateway.kv.enabled() },
    })))
}
