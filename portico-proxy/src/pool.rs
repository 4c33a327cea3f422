use async_trait::async_trait;
use axum::body::Body;
use axum::response::Response;
use http::Request;
use portico_core::config::ShellConfig;
use portico_core::GatewayError;
use std::path::Path;

/// The external worker-pool seam.
///
/// The runtime that actually executes worker applications lives outside the
/// gateway; all the gateway needs is the ability to hand a request to the
/// shell application and get a response back.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    async fn forward(
        &self,
        app_dir: &Path,
        config: &ShellConfig,
        request: Request<Body>,
    ) -> Result<Response, GatewayError>;
}
