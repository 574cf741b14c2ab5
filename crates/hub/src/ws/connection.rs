//! WebSocket connection handling
//!
//! Drives one connection from accept to close: registration, the welcome
//! greeting, per-kind message dispatch, and idempotent teardown. A failure
//! on one connection never reaches another session or the hub itself.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use pactline_protocol::{Envelope, MessageKind, CLOSE_NORMAL, DECODE_FAILURE_TEXT};

use crate::api::AppState;
use crate::registry::{next_connection_id, ConnectionId, Outbound, OutboundSender, SharedRegistry};

/// Connection endpoint.
///
/// Anything other than a WebSocket upgrade request is answered with
/// 426 Upgrade Required; a valid upgrade switches protocols and hands the
/// socket to [`handle_socket`].
pub async fn ws_handler(
    ws: Option<WebSocketUpgrade>,
    State(state): State<AppState>,
) -> Response {
    match ws {
        Some(upgrade) => upgrade
            .on_upgrade(move |socket| handle_socket(socket, state.registry))
            .into_response(),
        None => (StatusCode::UPGRADE_REQUIRED, "Expected WebSocket upgrade").into_response(),
    }
}

/// Handle a single accepted connection until it closes.
async fn handle_socket(socket: WebSocket, registry: SharedRegistry) {
    let conn = next_connection_id();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Dedicated writer task: the only place that touches the sink, so each
    // member receives frames in the order they were queued.
    let writer = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                Outbound::Frame(envelope) => match envelope.encode() {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to encode outbound envelope"),
                },
                Outbound::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let session = registry.write().await.register(conn, outbound_tx.clone());
    let session_id = session.id;

    if outbound_tx
        .send(Outbound::Frame(Envelope::welcome(&session_id)))
        .is_err()
    {
        tracing::warn!(session_id = %session_id, "Connection gone before welcome");
    }
    tracing::info!(session_id = %session_id, "Client connected");

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_frame(conn, &text, &outbound_tx, &registry).await;
            }
            Ok(Message::Binary(_)) => {
                tracing::debug!(session_id = %session_id, "Received binary message");
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map_or((CLOSE_NORMAL, String::new()), |f| {
                        (f.code, f.reason.to_string())
                    });
                tracing::info!(
                    session_id = %session_id,
                    code,
                    reason = %reason,
                    "Client disconnected"
                );
                break;
            }
            // Transport-level ping/pong frames are answered by the stack.
            Ok(_) => {}
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // The reaper may have removed the entry already; removal is idempotent.
    registry.write().await.remove(conn);
    writer.abort();
}

/// Decode and dispatch one inbound text frame.
async fn handle_frame(
    conn: ConnectionId,
    raw: &str,
    outbound: &OutboundSender,
    registry: &SharedRegistry,
) {
    // A frame can arrive after teardown; that is late traffic for a dead
    // handle, not an error.
    let Some(session) = registry.read().await.session(conn) else {
        tracing::warn!(conn, "Dropping message for unregistered connection");
        return;
    };

    let envelope = match Envelope::decode(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to decode frame");
            let _ = outbound.send(Outbound::Frame(Envelope::error(DECODE_FAILURE_TEXT)));
            return;
        }
    };

    match envelope.kind {
        MessageKind::Ping => {
            registry.write().await.touch(conn);
            if outbound.send(Outbound::Frame(Envelope::pong())).is_err() {
                tracing::warn!(session_id = %session.id, "Failed to queue pong");
            }
        }
        MessageKind::Message => {
            let relay = Envelope::message(envelope.data);
            let delivered = registry.read().await.broadcast(&relay, Some(conn));
            tracing::debug!(session_id = %session.id, delivered, "Broadcast message");
        }
        other => {
            tracing::debug!(session_id = %session.id, kind = %other, "Unknown message type");
        }
    }
}
