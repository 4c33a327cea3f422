use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use http::{Request, StatusCode};
use portico_core::rule::CompiledRule;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TargetCloseFrame;
use tokio_tungstenite::tungstenite::Message as TargetMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type TargetSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Intercept a WebSocket upgrade for a matched rule and ferry frames to a
/// client socket opened against the rule target.
pub async fn handle_upgrade(
    req: Request<Body>,
    rule: Arc<CompiledRule>,
    rewritten_path: String,
) -> Response {
    let (mut parts, _body) = req.into_parts();
    let query = parts.uri.query().map(str::to_string);
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(e) => {
            warn!(rule = %rule.id(), error = %e, "WebSocket upgrade refused");
            return (StatusCode::INTERNAL_SERVER_ERROR, "WebSocket upgrade failed")
                .into_response();
        }
    };

    let url = target_ws_url(&rule.target, &rewritten_path, query.as_deref());
    debug!(rule = %rule.id(), url = %url, "Relaying WebSocket");
    upgrade
        .on_upgrade(move |client| relay_session(client, url))
        .into_response()
}

async fn relay_session(mut client: WebSocket, url: String) {
    match connect_async(url.as_str()).await {
        Ok((target, _)) => bridge(client, target).await,
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to connect to relay target");
            let _ = client
                .send(Message::Close(Some(close_frame(
                    1011,
                    "Failed to connect to target",
                ))))
                .await;
        }
    }
}

/// Ferry frames until either side leaves the open state.
///
/// Sends are awaited inline, so a slow receiver backpressures the other
/// side's reads instead of dropping frames. Close frames propagate with
/// their `(code, reason)` pair; a target transport error closes the client
/// with 1011.
pub async fn bridge(client: WebSocket, target: TargetSocket) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut target_tx, mut target_rx) = target.split();

    loop {
        tokio::select! {
            msg = client_rx.next() => match msg {
                Some(Ok(Message::Close(frame))) => {
                    let _ = target_tx
                        .send(TargetMessage::Close(frame.map(close_to_target)))
                        .await;
                    break;
                }
                Some(Ok(msg)) => {
                    if let Some(forward) = client_to_target(msg)
                        && target_tx.send(forward).await.is_err()
                    {
                        let _ = client_tx
                            .send(Message::Close(Some(close_frame(
                                1011,
                                "Target connection error",
                            ))))
                            .await;
                        break;
                    }
                }
                Some(Err(_)) | None => {
                    let _ = target_tx.send(TargetMessage::Close(None)).await;
                    break;
                }
            },
            msg = target_rx.next() => match msg {
                Some(Ok(TargetMessage::Close(frame))) => {
                    let _ = client_tx
                        .send(Message::Close(frame.map(close_to_client)))
                        .await;
                    break;
                }
                Some(Ok(msg)) => {
                    if let Some(forward) = target_to_client(msg)
                        && client_tx.send(forward).await.is_err()
                    {
                        let _ = target_tx.send(TargetMessage::Close(None)).await;
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Relay target errored");
                    let _ = client_tx
                        .send(Message::Close(Some(close_frame(
                            1011,
                            "Target connection error",
                        ))))
                        .await;
                    break;
                }
                None => {
                    let _ = client_tx.send(Message::Close(None)).await;
                    break;
                }
            },
        }
    }
}

/// WS target URL: `ws`/`wss` mirrors the target's `http`/`https`; path is
/// the rewritten path, query preserved.
pub fn target_ws_url(target: &str, path: &str, query: Option<&str>) -> String {
    let origin = if let Some(rest) = target.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = target.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if target.starts_with("ws://") || target.starts_with("wss://") {
        target.to_string()
    } else {
        format!("ws://{target}")
    };
    match query {
        Some(q) if !q.is_empty() => format!("{origin}{path}?{q}"),
        _ => format!("{origin}{path}"),
    }
}

fn close_frame(code: u16, reason: &str) -> CloseFrame {
    CloseFrame {
        code,
        reason: reason.to_string().into(),
    }
}

fn close_to_target(frame: CloseFrame) -> TargetCloseFrame {
    TargetCloseFrame {
        code: frame.code.into(),
        reason: frame.reason.to_string().into(),
    }
}

fn close_to_client(frame: TargetCloseFrame) -> CloseFrame {
    CloseFrame {
        code: frame.code.into(),
        reason: frame.reason.to_string().into(),
    }
}

/// Client frame → target frame, message type preserved. Close is handled
/// by the relay loop.
fn client_to_target(msg: Message) -> Option<TargetMessage> {
    match msg {
        Message::Text(text) => Some(TargetMessage::Text(text.to_string().into())),
        Message::Binary(data) => Some(TargetMessage::Binary(data)),
        Message::Ping(data) => Some(TargetMessage::Ping(data)),
        Message::Pong(data) => Some(TargetMessage::Pong(data)),
        Message::Close(_) => None,
    }
}

/// Target frame → client frame. Raw frames never reach us (the stream is
/// not in raw mode); Close is handled by the relay loop.
fn target_to_client(msg: TargetMessage) -> Option<Message> {
    match msg {
        TargetMessage::Text(text) => Some(Message::Text(text.to_string().into())),
        TargetMessage::Binary(data) => Some(Message::Binary(data)),
        TargetMessage::Ping(data) => Some(Message::Ping(data)),
        TargetMessage::Pong(data) => Some(Message::Pong(data)),
        TargetMessage::Close(_) | TargetMessage::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── URL mapping ──────────────────────────────────────────────

    #[test]
    fn http_target_maps_to_ws() {
        assert_eq!(
            target_ws_url("http://backend:8080", "/chat", None),
            "ws://backend:8080/chat"
        );
    }

    #[test]
    fn https_target_maps_to_wss() {
        assert_eq!(
            target_ws_url("https://backend", "/chat", None),
            "wss://backend/chat"
        );
    }

    #[test]
    fn ws_targets_pass_through() {
        assert_eq!(
            target_ws_url("wss://backend", "/chat", None),
            "wss://backend/chat"
        );
    }

    #[test]
    fn query_is_preserved() {
        assert_eq!(
            target_ws_url("http://backend:8080", "/chat", Some("room=7")),
            "ws://backend:8080/chat?room=7"
        );
    }

    #[test]
    fn bare_host_defaults_to_ws() {
        assert_eq!(target_ws_url("backend:8080", "/x", None), "ws://backend:8080/x");
    }

    // ── Close-frame mapping ──────────────────────────────────────

    #[test]
    fn close_pair_round_trips_through_target_form() {
        let original = close_frame(1000, "bye");
        let target = close_to_target(original.clone());
        assert_eq!(u16::from(target.code), 1000);
        assert_eq!(target.reason.as_str(), "bye");

        let back = close_to_client(target);
        assert_eq!(back.code, 1000);
        assert_eq!(back.reason.as_str(), "bye");
    }

    #[test]
    fn error_close_frame_is_1011() {
        let frame = close_frame(1011, "Target connection error");
        assert_eq!(frame.code, 1011);
        assert_eq!(frame.reason.as_str(), "Target connection error");
    }

    // ── Message type preservation ────────────────────────────────

    #[test]
    fn text_frames_preserve_type_both_ways() {
        let to_target = client_to_target(Message::Text("hello".into())).unwrap();
        assert!(matches!(&to_target, TargetMessage::Text(t) if t.as_str() == "hello"));

        let to_client = target_to_client(TargetMessage::Text("hello".into())).unwrap();
        assert!(matches!(&to_client, Message::Text(t) if t.as_str() == "hello"));
    }

    #[test]
    fn binary_frames_preserve_type_both_ways() {
        let payload = bytes::Bytes::from_static(&[0u8, 159, 146, 150]);
        let to_target = client_to_target(Message::Binary(payload.clone())).unwrap();
        assert!(matches!(&to_target, TargetMessage::Binary(b) if b == &payload));

        let to_client = target_to_client(TargetMessage::Binary(payload.clone())).unwrap();
        assert!(matches!(&to_client, Message::Binary(b) if b == &payload));
    }

    #[test]
    fn ping_pong_are_forwarded() {
        assert!(matches!(
            client_to_target(Message::Ping(bytes::Bytes::new())),
            Some(TargetMessage::Ping(_))
        ));
        assert!(matches!(
            target_to_client(TargetMessage::Pong(bytes::Bytes::new())),
            Some(Message::Pong(_))
        ));
    }

    #[test]
    fn close_frames_are_loop_handled_not_converted() {
        assert!(client_to_target(Message::Close(None)).is_none());
        assert!(target_to_client(TargetMessage::Close(None)).is_none());
    }
}
