use crate::error::{ApiError, ApiResult};
use axum::extract::{Path, State};
use axum::Json;
use portico_proxy::Gateway;
use portico_store::adapter::merge_excludes;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

fn require_shell(gateway: &Gateway) -> ApiResult<()> {
    if gateway.shell.enabled() {
        Ok(())
    } else {
        Err(ApiError::unavailable("Shell is not configured"))
    }
}

/// GET /api/shell/excludes: merged env + keyval entries, env first.
pub async fn list(State(gateway): State<Arc<Gateway>>) -> ApiResult<Json<Value>> {
    require_shell(&gateway)?;
    let env = gateway.shell.env_excludes().to_vec();
    let merged = if gateway.kv.enabled() {
        gateway.kv.all_shell_excludes(&env).await
    } else {
        merge_excludes(&env, gateway.shell.keyval_excludes())
    };
    Ok(Json(json!({ "excludes": merged, "total": merged.len() })))
}

#[derive(Deserialize)]
pub struct AddExclude {
    pub basename: String,
}

/// POST /api/shell/excludes: persist first, then mirror in memory.
pub async fn add(
    State(gateway): State<Arc<Gateway>>,
    Json(body): Json<AddExclude>,
) -> ApiResult<Json<Value>> {
    require_shell(&gateway)?;
    let basename = body.basename;
    gateway.shell.check_basename(&basename)?;
    if gateway.shell.is_env_exclude(&basename) {
        return Err(ApiError::invalid(format!(
            "{basename:?} is already excluded by the environment"
        )));
    }

    let added = if gateway.kv.enabled() {
        let changed = gateway.kv.add_shell_exclude(&basename).await?;
        gateway.shell.insert_keyval(&basename);
        changed
    } else {
        gateway.shell.insert_keyval(&basename)
    };
    if added {
        info!(basename = %basename, "Shell exclude added");
    }
    Ok(Json(json!({
        "added": added,
        "basename": basename,
        "source": "keyval",
    })))
}

/// DELETE /api/shell/excludes/:basename
pub async fn remove(
    State(gateway): State<Arc<Gateway>>,
    Path(basename): Path<String>,
) -> ApiResult<Json<Value>> {
    require_shell(&gateway)?;
    gateway.shell.check_basename(&basename)?;
    if gateway.shell.is_env_exclude(&basename) {
        return Err(ApiError::invalid(format!(
            "{basename:?} is excluded by the environment and cannot be removed"
        )));
    }

    let removed = if gateway.kv.enabled() {
        let changed = gateway.kv.remove_shell_exclude(&basename).await?;
        gateway.shell.remove_keyval(&basename);
        changed
    } else {
        gateway.shell.remove_keyval(&basename)
    };
    if removed {
        info!(basename = %basename, "Shell exclude removed");
    }
    Ok(Json(json!({ "removed": removed, "basename": basename })))
}
