//! End-to-end WebSocket relay: a real client socket through the gateway to
//! a real target server, both on ephemeral ports.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use portico_core::config::GatewayConfig;
use portico_proxy::{pipeline, Gateway};
use portico_store::KvAdapter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_tungstenite::tungstenite;

/// Target app: greets, echoes one message, closes with (1000, "bye").
async fn target_chat(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(|mut socket: WebSocket| async move {
        socket.send(Message::Text("hello".into())).await.unwrap();
        if let Some(Ok(Message::Text(incoming))) = socket.recv().await {
            socket
                .send(Message::Text(format!("echo:{incoming}").into()))
                .await
                .unwrap();
        }
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "bye".into(),
            })))
            .await;
    })
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn relay_ferries_frames_and_propagates_close() {
    // Target WS server.
    let target_addr = serve(Router::new().route("/chat", any(target_chat))).await;

    // Gateway in front of it.
    let yaml = format!(
        r#"
rules:
  - pattern: "^/ws/(.*)$"
    target: "http://{target_addr}"
    rewrite: "/$1"
"#
    );
    let config: GatewayConfig = serde_yaml::from_str(&yaml).unwrap();
    let gateway = Arc::new(Gateway::new(config, KvAdapter::disabled(), None).unwrap());
    let gateway_addr = serve(
        Router::new()
            .fallback(pipeline::handle)
            .with_state(Arc::clone(&gateway)),
    )
    .await;

    // Real client through the gateway.
    let (mut client, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway_addr}/ws/chat"))
            .await
            .expect("gateway upgrade");

    // Target → client.
    let greeting = client.next().await.unwrap().unwrap();
    assert_eq!(greeting, tungstenite::Message::Text("hello".into()));

    // Client → target → client.
    client
        .send(tungstenite::Message::Text("hi".into()))
        .await
        .unwrap();
    let echoed = client.next().await.unwrap().unwrap();
    assert_eq!(echoed, tungstenite::Message::Text("echo:hi".into()));

    // Close propagates with the same (code, reason) pair.
    match client.next().await.unwrap().unwrap() {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason.as_str(), "bye");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    // The upgrade was recorded.
    let entries = gateway.log.recent(1);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, 101);
}

#[tokio::test]
async fn unreachable_target_closes_client_with_1011() {
    let yaml = r#"
rules:
  - pattern: "^/ws/(.*)$"
    target: "http://127.0.0.1:9"
    rewrite: "/$1"
"#;
    let config: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
    let gateway = Arc::new(Gateway::new(config, KvAdapter::disabled(), None).unwrap());
    let gateway_addr = serve(
        Router::new()
            .fallback(pipeline::handle)
            .with_state(gateway),
    )
    .await;

    let (mut client, _) =
        tokio_tungstenite::connect_async(format!("ws://{gateway_addr}/ws/chat"))
            .await
            .expect("the upgrade itself succeeds");

    match client.next().await.unwrap().unwrap() {
        tungstenite::Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1011);
            assert_eq!(frame.reason.as_str(), "Failed to connect to target");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}
