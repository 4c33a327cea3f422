use crate::error::ApiResult;
use crate::handlers::{cors_config_json, rate_limit_config_json};
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use portico_proxy::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/stats: one-shot snapshot across every component.
pub async fn stats(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let rate_limit = match (&gateway.limiter, &gateway.config.rate_limit) {
        (Some(limiter), Some(cfg)) => json!({
            "metrics": limiter.metrics(),
            "config": rate_limit_config_json(cfg),
        }),
        _ => Value::Null,
    };
    let cors = gateway
        .config
        .cors
        .as_ref()
        .map(cors_config_json)
        .unwrap_or(Value::Null);

    let excludes_count =
        gateway.shell.env_excludes().len() + gateway.shell.keyval_excludes().len();

    Ok(Json(json!({
        "timestamp": Utc::now(),
        "rateLimit": rate_limit,
        "cors": cors,
        "cache": { "enabled": gateway.config.cache.enabled },
        "shell": {
            "enabled": gateway.shell.enabled(),
            "dir": gateway.shell.dir(),
            "excludesCount": excludes_count,
        },
        "logs": gateway.log.stats(),
    })))
}
