use crate::html;
use axum::body::Body;
use axum::response::Response;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, StatusCode};
use portico_core::rule::CompiledRule;
use portico_core::GatewayError;
use tracing::{debug, warn};

/// Headers meaningful only to the immediate connection, never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Connection-level response headers stripped before returning upstream
/// output to the client.
const RESPONSE_STRIP: [&str; 3] = ["connection", "keep-alive", "transfer-encoding"];

/// Upstream HTTP relay for matched rules.
///
/// Bodies stream in both directions; the sole exception is an HTML response
/// on a rule with `base`/`relative_paths` set, which is buffered for
/// post-processing.
pub struct HttpRelay {
    client: reqwest::Client,
}

impl HttpRelay {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Execute the upstream request for a matched rule. Transport failures
    /// surface as a 502 JSON response, never as an error.
    pub async fn forward(
        &self,
        rule: &CompiledRule,
        req: Request<Body>,
        rewritten_path: &str,
    ) -> Response {
        let (parts, body) = req.into_parts();
        let url = build_target_url(&rule.target, rewritten_path, parts.uri.query());

        let mut headers = parts.headers.clone();
        scrub_request_headers(&mut headers);
        if rule.rule.change_origin {
            apply_change_origin(&mut headers, &rule.target);
        }
        apply_rule_headers(&mut headers, &rule.rule.headers);

        debug!(rule = %rule.id(), url = %url, "Relaying upstream");

        let upstream = self
            .client
            .request(parts.method.clone(), url.as_str())
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match upstream {
            Ok(resp) => resp,
            Err(e) => return transport_error(e),
        };

        let status = upstream.status();
        let mut resp_headers = upstream.headers().clone();
        scrub_response_headers(&mut resp_headers);

        let is_html = resp_headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/html"))
            .unwrap_or(false);

        let body = if is_html && (rule.rule.base.is_some() || rule.rule.relative_paths) {
            let bytes = match upstream.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => return transport_error(e),
            };
            let transformed = html::post_process(
                &String::from_utf8_lossy(&bytes),
                rule.rule.relative_paths,
                rule.rule.base.as_deref(),
            );
            resp_headers.remove(CONTENT_LENGTH);
            Body::from(transformed)
        } else {
            Body::from_stream(upstream.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = resp_headers;
        response
    }
}

impl Default for HttpRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// Target URL = rule origin + rewritten path + original query string.
pub fn build_target_url(target: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{target}{path}?{q}"),
        _ => format!("{target}{path}"),
    }
}

/// Remove the hop-by-hop set from a forwarded request.
pub fn scrub_request_headers(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Remove connection-level headers from an upstream response.
pub fn scrub_response_headers(headers: &mut HeaderMap) {
    for name in RESPONSE_STRIP {
        headers.remove(name);
    }
}

/// Overwrite `host` and `origin` with the target's.
pub fn apply_change_origin(headers: &mut HeaderMap, target: &str) {
    let Ok(url) = reqwest::Url::parse(target) else {
        warn!(target = %target, "change_origin: target is not a parseable URL");
        return;
    };
    let Some(host) = url.host_str() else {
        return;
    };
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&authority) {
        headers.insert(http::header::HOST, value);
    }
    let origin = format!("{}://{authority}", url.scheme());
    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(http::header::ORIGIN, value);
    }
}

/// Apply per-rule header overrides; invalid names/values are skipped.
pub fn apply_rule_headers(
    headers: &mut HeaderMap,
    overrides: &std::collections::HashMap<String, String>,
) {
    for (name, value) in overrides {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid rule header"),
        }
    }
}

fn transport_error(e: reqwest::Error) -> Response {
    let err = GatewayError::UpstreamTransport(e.to_string());
    warn!(error = %e, "Upstream transport failure");
    let mut response = Response::new(Body::from(err.to_json_body()));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
