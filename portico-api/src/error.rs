use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use portico_core::GatewayError;
use serde_json::json;

/// The single error-to-response injection point: every control-plane route
/// funnels failures through here, producing a consistent `{error}` envelope.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self(GatewayError::InvalidInput(msg.into()))
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self(GatewayError::Forbidden(msg.into()))
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(GatewayError::NotFound(msg.into()))
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self(GatewayError::Unavailable(msg.into()))
    }
}
