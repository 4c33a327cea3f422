use thiserror::Error;

/// Unified error type for the Portico gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// A feature the caller relies on is not enabled (no limiter, no shell,
    /// no KV store). Surfaces as 400, matching the control-plane contract.
    #[error("{0}")]
    Unavailable(String),

    #[error("Proxy error: {0}")]
    UpstreamTransport(String),

    #[error("{0}")]
    WebSocketUpgrade(String),

    #[error("Too Many Requests")]
    RateLimited,

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidInput(_) => 400,
            GatewayError::Forbidden(_) => 403,
            GatewayError::NotFound(_) => 404,
            GatewayError::Unavailable(_) => 400,
            GatewayError::UpstreamTransport(_) => 502,
            GatewayError::WebSocketUpgrade(_) => 500,
            GatewayError::RateLimited => 429,
            _ => 500,
        }
    }

    /// JSON error envelope, `{"error": <message>}`.
    pub fn to_json_body(&self) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({ "error": self.to_string() }))
            .unwrap_or_else(|_| br#"{"error":"internal"}"#.to_vec())
    }
}
