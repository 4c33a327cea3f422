use crate::error::ApiResult;
use axum::extract::State;
use axum::Json;
use portico_proxy::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/fragments: rules carrying micro-frontend metadata, projected
/// for the host application.
pub async fn list(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let fragments: Vec<Value> = gateway
        .rules
        .all()
        .iter()
        .filter_map(|rule| {
            let fragment = rule.rule.fragment.as_ref()?;
            Some(json!({
                "id": rule.rule.id,
                "name": rule.rule.name,
                "pattern": rule.rule.pattern,
                "origin": rule.target,
                "base": rule.rule.base,
                "sandbox": fragment.sandbox.as_deref().unwrap_or("patch"),
                "allowMessageBus": fragment.allow_message_bus.unwrap_or(true),
                "preloadStyles": fragment.preload_styles,
            }))
        })
        .collect();
    Ok(Json(json!({ "fragments": fragments, "total": fragments.len() })))
}
