use crate::handlers;
use axum::routing::{delete, get, post};
use axum::Router;
use portico_proxy::pipeline;
use portico_proxy::Gateway;
use std::sync::Arc;

/// The control-plane route tree (`/api/...`), without state applied.
pub fn api_routes() -> Router<Arc<Gateway>> {
    let api = Router::new()
        .route("/sse", get(handlers::sse::stream))
        .route("/stats", get(handlers::stats::stats))
        .route("/config", get(handlers::config::config))
        // Rate limiting
        .route("/rate-limit/metrics", get(handlers::rate_limit::metrics))
        .route("/rate-limit/buckets", get(handlers::rate_limit::buckets))
        .route(
            "/rate-limit/buckets/{key}",
            delete(handlers::rate_limit::delete_bucket),
        )
        .route("/rate-limit/clear", post(handlers::rate_limit::clear))
        // Metrics history
        .route(
            "/metrics/history",
            get(handlers::metrics::history).delete(handlers::metrics::clear_history),
        )
        // Shell excludes
        .route(
            "/shell/excludes",
            get(handlers::shell::list).post(handlers::shell::add),
        )
        .route(
            "/shell/excludes/{basename}",
            delete(handlers::shell::remove),
        )
        // Request log
        .route(
            "/logs",
            get(handlers::logs::query).delete(handlers::logs::clear),
        )
        .route("/logs/stats", get(handlers::logs::stats))
        // Rules CRUD
        .route(
            "/rules",
            get(handlers::rules::list).post(handlers::rules::create),
        )
        .route(
            "/rules/{id}",
            get(handlers::rules::get)
                .put(handlers::rules::update)
                .delete(handlers::rules::delete),
        )
        // Micro-frontend fragments
        .route("/fragments", get(handlers::fragments::list));

    Router::new().nest("/api", api)
}

/// The complete gateway router: control plane nested under the configured
/// base path, every other request handled by the proxy pipeline.
pub fn gateway_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .nest(&gateway.config.api_base, api_routes())
        .fallback(pipeline::handle)
        .with_state(gateway)
}
