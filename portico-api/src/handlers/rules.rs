use crate::error::{ApiError, ApiResult};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use portico_core::rule::{CompiledRule, Rule};
use portico_proxy::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn rule_json(rule: &CompiledRule) -> Value {
    let mut value = serde_json::to_value(&rule.rule).unwrap_or_default();
    value["readonly"] = json!(rule.rule.readonly);
    value
}

fn require_kv(gateway: &Gateway) -> ApiResult<()> {
    if gateway.kv.enabled() {
        Ok(())
    } else {
        Err(ApiError::unavailable("KV store is not enabled"))
    }
}

/// GET /api/rules
pub async fn list(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    let rules: Vec<Value> = gateway.rules.all().iter().map(|r| rule_json(r)).collect();
    Ok(Json(json!({ "rules": rules, "total": rules.len() })))
}

/// GET /api/rules/:id
pub async fn get(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let rule = gateway
        .rules
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("Rule not found: {id}")))?;
    Ok(Json(rule_json(&rule)))
}

/// POST /api/rules: persist to the KV first, memory second, so an
/// interrupted write never leaves a rule visible but unstored.
pub async fn create(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    require_kv(&gateway)?;

    let mut rule: Rule = serde_json::from_value(body)
        .map_err(|e| ApiError::invalid(format!("invalid rule: {e}")))?;
    rule.id = uuid::Uuid::new_v4().to_string();
    rule.readonly = false;

    let compiled =
        CompiledRule::compile(rule.clone()).map_err(|e| ApiError::invalid(e.to_string()))?;

    gateway.kv.put_rule(&rule).await?;
    let response = rule_json(&compiled);
    gateway.rules.insert(compiled);
    info!(id = %rule.id, pattern = %rule.pattern, "Rule created");
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /api/rules/:id: merge the submitted partial over the stored rule.
pub async fn update(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    require_kv(&gateway)?;
    if gateway.rules.is_static(&id) {
        return Err(ApiError::forbidden("Static rules are read-only"));
    }
    let existing = gateway
        .rules
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("Rule not found: {id}")))?;

    let mut merged = serde_json::to_value(&existing.rule).unwrap_or_default();
    if let (Some(target), Some(patch)) = (merged.as_object_mut(), body.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    } else {
        return Err(ApiError::invalid("rule body must be an object"));
    }
    merged["id"] = json!(id);

    let mut rule: Rule = serde_json::from_value(merged)
        .map_err(|e| ApiError::invalid(format!("invalid rule: {e}")))?;
    rule.readonly = false;
    let compiled =
        CompiledRule::compile(rule.clone()).map_err(|e| ApiError::invalid(e.to_string()))?;

    gateway.kv.put_rule(&rule).await?;
    let response = rule_json(&compiled);
    gateway.rules.replace(&id, compiled);
    info!(id = %id, "Rule updated");
    Ok(Json(response))
}

/// DELETE /api/rules/:id
pub async fn delete(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    require_kv(&gateway)?;
    if gateway.rules.is_static(&id) {
        return Err(ApiError::forbidden("Static rules are read-only"));
    }
    if gateway.rules.get(&id).is_none() {
        return Err(ApiError::not_found(format!("Rule not found: {id}")));
    }

    gateway.kv.delete_rule(&id).await?;
    gateway.rules.remove(&id);
    info!(id = %id, "Rule deleted");
    Ok(Json(json!({ "deleted": true, "id": id })))
}
