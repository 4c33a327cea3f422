//! End-to-end HTTP relay: the gateway in front of a live upstream, both on
//! ephemeral ports, so header scrubbing and rewrites are observed from the
//! upstream's side.

use axum::body::Body;
use axum::response::IntoResponse;
use axum::Json;
use axum::routing::get;
use axum::Router;
use http::header::CONTENT_TYPE;
use http::Request;
use portico_core::config::GatewayConfig;
use portico_proxy::{pipeline, Gateway};
use portico_store::KvAdapter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Reflects the request line and headers back as JSON.
async fn echo(req: Request<Body>) -> Json<Value> {
    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    Json(json!({
        "path": req.uri().path(),
        "query": req.uri().query(),
        "headers": headers,
    }))
}

async fn html_page() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/html")],
        r#"<html><head><title>app</title></head><img src="/logo.png"></html>"#,
    )
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn gateway_in_front(upstream: SocketAddr, extra: &str) -> SocketAddr {
    let yaml = format!(
        r#"
rate_limit:
  requests: 100
  window: "1m"
rules:
  - pattern: "^/api/(.*)$"
    target: "http://{upstream}"
    rewrite: "/v1/$1"
    changeOrigin: true
    headers:
      X-Tenant: acme
{extra}
"#
    );
    let config: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
    let gateway = Arc::new(Gateway::new(config, KvAdapter::disabled(), None).unwrap());
    serve(
        Router::new()
            .fallback(pipeline::handle)
            .with_state(gateway),
    )
    .await
}

#[tokio::test]
async fn rewrite_preserves_query_and_scrubs_hop_by_hop() {
    let upstream = serve(Router::new().fallback(echo)).await;
    let gateway = gateway_in_front(upstream, "").await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{gateway}/api/users?page=1"))
        .header("te", "trailers")
        .header("proxy-authorization", "Basic abc")
        .header("x-api-key", "opaque-credential")
        .header("x-forwarded-for", "10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let seen: Value = response.json().await.unwrap();

    // S1: rewritten path, original query.
    assert_eq!(seen["path"], "/v1/users");
    assert_eq!(seen["query"], "page=1");

    let headers = seen["headers"].as_object().unwrap();
    // Hop-by-hop headers never reach the upstream.
    assert!(!headers.contains_key("te"));
    assert!(!headers.contains_key("proxy-authorization"));
    // Opaque credentials pass through unchanged.
    assert_eq!(headers["x-api-key"], "opaque-credential");
    // Per-rule header overlay.
    assert_eq!(headers["x-tenant"], "acme");
    // change_origin rewrote the Host header to the target's authority.
    assert_eq!(headers["host"], upstream.to_string());
    // The admission decision is forwarded for downstream handlers.
    assert_eq!(headers["x-ratelimit-remaining"], "99");
}

#[tokio::test]
async fn html_responses_are_post_processed() {
    let upstream = serve(Router::new().route("/page", get(html_page))).await;
    let extra = format!(
        r#"  - pattern: "^/app$"
    target: "http://{upstream}"
    rewrite: "/page"
    base: "/app"
    relativePaths: true"#
    );
    let gateway = gateway_in_front(upstream, &extra).await;

    let body = reqwest::get(format!("http://{gateway}/app"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains(r#"src="./logo.png""#), "body: {body}");
    assert_eq!(body.matches("<base").count(), 1);
    assert!(body.contains(r#"<head><base href="/app/" /><title>"#));
}

#[tokio::test]
async fn non_html_bodies_stream_through_untouched() {
    let upstream = serve(Router::new().fallback(echo)).await;
    let extra = format!(
        r#"  - pattern: "^/raw/(.*)$"
    target: "http://{upstream}"
    base: "/ignored-for-json""#
    );
    let gateway = gateway_in_front(upstream, &extra).await;

    let seen: Value = reqwest::get(format!("http://{gateway}/raw/data"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(seen["path"], "/raw/data", "no rewrite template, path passes through");
}
