pub mod config;
pub mod fragments;
pub mod logs;
pub mod metrics;
pub mod rate_limit;
pub mod rules;
pub mod shell;
pub mod sse;
pub mod stats;

use portico_core::config::{CorsConfig, RateLimitConfig};
use serde_json::{json, Value};

/// Wire form of the rate-limit config (camelCase, matching the payloads
/// the control plane exposes).
pub(crate) fn rate_limit_config_json(cfg: &RateLimitConfig) -> Value {
    json!({
        "requests": cfg.requests,
        "window": cfg.window,
        "keyBy": cfg.key_by,
        "excludePaths": cfg.exclude_paths,
    })
}

/// Wire form of the CORS config.
pub(crate) fn cors_config_json(cfg: &CorsConfig) -> Value {
    json!({
        "origin": cfg.origin,
        "credentials": cfg.credentials,
        "methods": cfg.methods,
        "allowedHeaders": cfg.allowed_headers,
        "exposedHeaders": cfg.exposed_headers,
        "maxAge": cfg.max_age,
    })
}
