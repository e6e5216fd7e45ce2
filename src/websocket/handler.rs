use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::{CloseReason, ConnectionHandle, ConnectionMeta};
use crate::server::AppState;

use super::message::{OutboundMessage, ServerMessage};

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, headers))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let meta = ConnectionMeta {
        remote_addr: Some(remote_addr),
        user_agent,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, meta))
}

/// Drive one accepted socket from registration to cleanup
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, meta),
    fields(remote_addr = ?meta.remote_addr, otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, meta: ConnectionMeta) {
    let (tx, mut rx) =
        mpsc::channel::<OutboundMessage>(state.settings.websocket.outbound_queue_size);

    let handle = match state.connection_manager.register(meta, tx) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(error = %e, "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            if let Ok(json) = serde_json::to_string(&ServerMessage::error(e.to_string())) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    let catalogue = state.settings.streams.catalogue();
    let _ = handle.send(ServerMessage::connected(connection_id, catalogue)).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: drain the outbound queue until the connection is closed by anyone
    let close_signal = handle.close_signal();
    let mut send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = close_signal.cancelled() => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return None;
                }
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => return None,
                },
            };

            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                tracing::debug!(error = %e, "WebSocket send failed");
                return Some(CloseReason::TransportError);
            }

            // Browsers answer transport pings on their own, which keeps liveness
            // fresh even for clients that ignore the JSON heartbeat.
            if msg.is_heartbeat() && ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                return Some(CloseReason::TransportError);
            }
        }
    });

    // Reader: route inbound frames until the peer goes away
    let reader_state = state.clone();
    let reader_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        let close_signal = reader_handle.close_signal();
        loop {
            let next = tokio::select! {
                _ = close_signal.cancelled() => return None,
                next = ws_receiver.next() => next,
            };

            match next {
                Some(Ok(msg)) => {
                    if let Some(reason) = process_message(msg, &reader_state, &reader_handle).await {
                        return Some(reason);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return Some(CloseReason::TransportError);
                }
                None => return Some(CloseReason::ClientClosed),
            }
        }
    });

    // Whichever side finishes first decides the close reason. `None` means the
    // connection was already closed elsewhere (heartbeat, slow consumer, shutdown).
    let reason = tokio::select! {
        result = &mut send_task => {
            recv_task.abort();
            result.ok().flatten()
        }
        result = &mut recv_task => {
            send_task.abort();
            result.ok().flatten()
        }
    };

    let reason = reason.unwrap_or(CloseReason::TransportError);
    state.connection_manager.close(connection_id, reason);

    tracing::debug!(
        connection_id = %connection_id,
        close_reason = ?handle.close_reason(),
        "WebSocket connection finished"
    );
}

/// Handle one inbound frame. Returns a close reason when the connection should end.
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> Option<CloseReason> {
    match msg {
        Message::Text(text) => {
            state.router.route_text(handle, text.as_str()).await;
            None
        }
        Message::Binary(_) => {
            handle.touch();
            let _ = handle
                .send(ServerMessage::error("Binary messages are not supported"))
                .await;
            None
        }
        Message::Ping(_) | Message::Pong(_) => {
            // axum replies to pings itself; either way the peer is alive
            handle.touch();
            None
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            Some(CloseReason::ClientClosed)
        }
    }
}
