use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header::ORIGIN, HeaderMap},
    response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::chat::spawn_session;
use crate::chat::types::{ClientEvent, ServerEvent};
use crate::metrics::Counter;

/// Close reason sent to sockets whose origin is not allowed.
const ORIGIN_NOT_ALLOWED: &str = "origin_not_allowed";

/// `GET /ws`: upgrade to a chat session.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let origin = headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| async move {
        if state.origin_allowed(origin.as_deref()) {
            handle_session(socket, state, origin.unwrap_or_default()).await;
        } else {
            reject(socket, origin.unwrap_or_default()).await;
        }
    })
}

async fn reject(mut socket: WebSocket, origin: String) {
    warn!(origin = %origin, "ws connection rejected: origin not allowed");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: ORIGIN_NOT_ALLOWED.into(),
        })))
        .await;
}

/// Serialise an outbound event.  Returns `false` once the client is gone.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "ws event serialisation failed");
            true
        }
    }
}

/// Per-connection session logic.
async fn handle_session(mut socket: WebSocket, state: AppState, origin: String) {
    let metrics = std::sync::Arc::clone(&state.deps.metrics);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (session_id, client_tx, session_task) = spawn_session(state.deps.clone(), out_tx.clone());

    metrics.incr(Counter::WsConnections);
    info!(session_id = %session_id, origin = %origin, "ws connection opened");
    let _ = out_tx.send(ServerEvent::SessionCreated {
        session_id: session_id.clone(),
    });

    loop {
        tokio::select! {
            Some(event) = out_rx.recv() => {
                if !send_event(&mut socket, &event).await {
                    break;
                }
            }
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "ws socket error");
                        break;
                    }
                    _ => continue, // ping/pong
                };
                match ClientEvent::parse(&text) {
                    Ok(event) => {
                        if client_tx.send(event).is_err() {
                            error!(session_id = %session_id, "session task gone");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "ws message rejected");
                        let _ = out_tx.send(ServerEvent::error(e.code()));
                    }
                }
            }
        }
    }

    drop(client_tx);
    match session_task.await {
        Ok(session) => debug!(
            session_id = %session_id,
            messages = session.history().len(),
            "session closed"
        ),
        Err(e) => error!(session_id = %session_id, error = %e, "session task failed"),
    }
    metrics.incr(Counter::WsDisconnects);
    info!(session_id = %session_id, "ws connection closed");
}
