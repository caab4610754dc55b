//! WebSocket gateway: handshake, per-connection reader/writer tasks,
//! heartbeat, and session cleanup.
//!
//! Each connection runs exactly two tasks. The writer owns the socket's
//! write side and consumes the session's bounded channel; the reader
//! decodes envelopes and hands them to the delivery pipeline. The read
//! deadline is extended by any inbound frame, pongs included.

pub mod session;
pub mod table;

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nexim_shared::platform::Platform;

use crate::auth;
use crate::delivery::ReqContext;
use crate::web::AppState;

use session::{CloseReason, EnqueueOutcome, OutFrame, SessionHandle, SessionState};

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: String,
    #[serde(default)]
    send_id: String,
    #[serde(default)]
    platform_id: i32,
    #[serde(default)]
    sdk_type: Option<String>,
}

/// `GET /ws?token&send_id&platform_id&sdk_type`. The token is checked
/// exactly like the HTTP path and must belong to `send_id`.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let config = state.config.load();

    let identity = match auth::verify_token(&config, &query.token) {
        Ok(identity) => identity,
        Err(_) => {
            warn!(send_id = %query.send_id, "websocket handshake rejected (token)");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    if query.send_id.is_empty() || identity.user_id != query.send_id {
        warn!(send_id = %query.send_id, "websocket handshake rejected (send_id mismatch)");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(platform) = Platform::from_id(query.platform_id) else {
        warn!(platform_id = query.platform_id, "websocket handshake rejected (platform)");
        return StatusCode::BAD_REQUEST.into_response();
    };

    debug!(
        send_id = %query.send_id,
        platform = %platform.name(),
        sdk_type = ?query.sdk_type,
        "websocket handshake accepted"
    );

    let max_message_size = config.gateway.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_connection(socket, state, query.send_id, platform))
        .into_response()
}

async fn handle_connection(socket: WebSocket, state: AppState, user_id: String, platform: Platform) {
    let config = state.config.load();
    let gw = &config.gateway;

    let conn_id = Uuid::new_v4().simple().to_string();
    let (handle, rx) = SessionHandle::new(&user_id, platform, &conn_id, gw.write_buffer);
    handle.activate();

    if let Some(evicted) = state.table.register(handle.clone()).await {
        debug!(conn_id = %evicted.conn_id, "superseded previous session");
    }
    info!(user_id = %user_id, platform = %platform.name(), conn_id = %conn_id, "session active");

    let (ws_tx, mut ws_rx) = socket.split();

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        handle.clone(),
        Duration::from_secs(gw.ping_period_secs),
        Duration::from_secs(gw.write_wait_secs),
    ));

    let pong_wait = Duration::from_secs(gw.pong_wait_secs);
    let identity = ReqContext {
        user_id: user_id.clone(),
        platform,
        operation_id: format!("conn-{conn_id}"),
    };

    loop {
        tokio::select! {
            _ = handle.wait_closing() => break,
            next = tokio::time::timeout(pong_wait, ws_rx.next()) => match next {
                Err(_) => {
                    handle.begin_close(CloseReason::PongTimeout);
                    break;
                }
                Ok(None) => {
                    handle.begin_close(CloseReason::ClientClose);
                    break;
                }
                Ok(Some(Err(e))) => {
                    debug!(conn_id = %conn_id, error = %e, "websocket read failed");
                    handle.begin_close(CloseReason::ReadError);
                    break;
                }
                Ok(Some(Ok(msg))) => match msg {
                    Message::Text(text) => {
                        dispatch(&state, &identity, &handle, text.as_str()).await;
                    }
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch(&state, &identity, &handle, text).await,
                        Err(_) => debug!(conn_id = %conn_id, "dropping non-utf8 frame"),
                    },
                    Message::Close(_) => {
                        handle.begin_close(CloseReason::ClientClose);
                        break;
                    }
                    // Any inbound traffic, pongs included, already extended
                    // the deadline via the timeout above.
                    Message::Ping(_) | Message::Pong(_) => {}
                },
            },
        }
    }

    handle.begin_close(CloseReason::ClientClose);
    state.table.remove(&user_id, platform, &conn_id).await;
    if tokio::time::timeout(Duration::from_secs(1), &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
    if handle.mark_closed() {
        state.table.run_close_hooks(&handle);
    }
    info!(
        user_id = %user_id,
        conn_id = %conn_id,
        reason = handle.close_reason().map(|r| r.as_str()).unwrap_or("unknown"),
        "session closed"
    );
}

/// Sole writer for the socket. Sends a ping every `ping_period` and stops
/// after emitting the close frame.
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: tokio::sync::mpsc::Receiver<OutFrame>,
    handle: SessionHandle,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ping = tokio::time::interval(ping_period);
    ping.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(OutFrame::Text(text)) => {
                    match tokio::time::timeout(write_wait, ws_tx.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => {
                            handle.begin_close(CloseReason::ReadError);
                            return;
                        }
                    }
                }
                Some(OutFrame::Close(reason)) => {
                    send_close(&mut ws_tx, write_wait, Some(reason)).await;
                    return;
                }
                None => return,
            },
            _ = handle.wait_closing() => {
                send_close(&mut ws_tx, write_wait, handle.close_reason()).await;
                return;
            }
            _ = ping.tick() => {
                let sent = tokio::time::timeout(write_wait, ws_tx.send(Message::Ping(Vec::new().into()))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    handle.begin_close(CloseReason::ReadError);
                    return;
                }
            }
        }

        if handle.state() >= SessionState::Closing {
            send_close(&mut ws_tx, write_wait, handle.close_reason()).await;
            return;
        }
    }
}

async fn send_close(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    write_wait: Duration,
    reason: Option<CloseReason>,
) {
    let frame = CloseFrame {
        code: 1000,
        reason: reason.map(|r| r.as_str()).unwrap_or("").into(),
    };
    let _ = tokio::time::timeout(write_wait, ws_tx.send(Message::Close(Some(frame)))).await;
}

async fn dispatch(state: &AppState, identity: &ReqContext, handle: &SessionHandle, raw: &str) {
    let response = state.pipeline.handle_frame(identity, raw).await;
    if handle.enqueue(response) == EnqueueOutcome::Backpressure {
        // The response is dropped; the client recovers by pulling. Strikes
        // still count toward eviction.
        let strikes = handle.note_backpressure();
        warn!(
            conn_id = %handle.conn_id,
            strikes,
            "response dropped, write channel full"
        );
    }
}
