use crate::handlers::{cors_config_json, rate_limit_config_json};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::Utc;
use futures::stream::Stream;
use portico_proxy::Gateway;
use portico_store::adapter::merge_excludes;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Cadence of the live stream.
pub const SSE_INTERVAL: Duration = Duration::from_secs(1);

/// GET /api/sse: one JSON frame per second until the client disconnects.
pub async fn stream(
    State(gateway): State<Arc<Gateway>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::stream::unfold(gateway, |gateway| async move {
        tokio::time::sleep(SSE_INTERVAL).await;
        let event = Event::default().data(payload(&gateway).to_string());
        Some((Ok::<_, Infallible>(event), gateway))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// One frame of the live stream.
pub fn payload(gateway: &Gateway) -> Value {
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
    let excludes = merge_excludes(
        gateway.shell.env_excludes(),
        gateway.shell.keyval_excludes(),
    );

    json!({
        "timestamp": Utc::now(),
        "rateLimit": rate_limit,
        "cors": cors,
        "shell": {
            "enabled": gateway.shell.enabled(),
            "dir": gateway.shell.dir(),
            "excludes": excludes,
        },
        "recentLogs": gateway.log.recent(10),
    })
}
