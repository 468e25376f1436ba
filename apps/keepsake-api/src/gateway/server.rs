//! WebSocket upgrade handler and per-connection event loop.
//!
//! Authentication, group joins and the presence mark all happen before the
//! upgrade response is sent, so a refused client gets a plain HTTP error
//! and never sees an open socket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::auth::tokens::Identity;
use crate::error::ApiError;
use crate::models::user::User;
use crate::AppState;

use super::events::{Envelope, EventType};
use super::heartbeat;
use super::layer::Inbox;
use super::session::{Connection, ConnectionState, Outbound};

/// Close codes (4000-range for application-level).
pub const CLOSE_CONNECT_FAILED: u16 = 4000;
pub const CLOSE_UNAUTHENTICATED: u16 = 4003;

/// Frames buffered for the writer before relayed events are dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// How long the writer may take to flush after the connection ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router() -> Router<AppState> {
    Router::new().route("/ws/", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

/// Why a connection was refused before the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRefusal {
    Unauthenticated,
    Internal,
}

impl ConnectRefusal {
    pub fn close_code(self) -> u16 {
        match self {
            ConnectRefusal::Unauthenticated => CLOSE_UNAUTHENTICATED,
            ConnectRefusal::Internal => CLOSE_CONNECT_FAILED,
        }
    }
}

impl IntoResponse for ConnectRefusal {
    fn into_response(self) -> Response {
        match self {
            ConnectRefusal::Unauthenticated => ApiError::new(
                StatusCode::FORBIDDEN,
                "UNAUTHENTICATED",
                "A valid access token is required",
            ),
            ConnectRefusal::Internal => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONNECT_FAILED",
                "Connection could not be established",
            ),
        }
        .into_response()
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, uri: Uri, State(state): State<AppState>) -> Response {
    let token = Query::<ConnectParams>::try_from_uri(&uri)
        .ok()
        .and_then(|Query(params)| params.access_token);

    let (conn, inbox) = match connect(&state, token.as_deref()).await {
        Ok(accepted) => accepted,
        Err(refusal) => {
            tracing::info!(close_code = refusal.close_code(), ?refusal, "refusing push connection");
            return refusal.into_response();
        }
    };

    let failed_state = state.clone();
    let failed_conn = conn.clone();
    ws.on_failed_upgrade(move |err| {
        tracing::warn!(%err, channel = %failed_conn.channel, "websocket upgrade failed");
        tokio::spawn(async move {
            failed_conn.begin_closing();
            release(&failed_state, &failed_conn).await;
            failed_conn.set_state(ConnectionState::Closed);
        });
    })
    .on_upgrade(move |socket| run_connection(socket, state, conn, inbox))
}

/// Authenticate, join groups and mark the user present.
///
/// On any failure after the channel is allocated, partial joins are rolled
/// back before refusing.
pub async fn connect(
    state: &AppState,
    token: Option<&str>,
) -> Result<(Arc<Connection>, Inbox), ConnectRefusal> {
    let identity = state
        .tokens
        .authenticate(state.users.as_ref(), token)
        .await
        .map_err(|err| {
            tracing::error!(%err, "user lookup failed during connect");
            ConnectRefusal::Internal
        })?;

    let Identity::User(user) = identity else {
        return Err(ConnectRefusal::Unauthenticated);
    };

    let (channel, inbox) = state.layer.new_channel().await.map_err(|err| {
        tracing::error!(user_id = user.id, %err, "failed to allocate channel");
        ConnectRefusal::Internal
    })?;

    let conn = Arc::new(Connection::new(channel, user));
    conn.set_state(ConnectionState::Authenticating);
    for group in conn.groups() {
        if let Err(err) = state.layer.group_add(group, &conn.channel).await {
            tracing::error!(user_id = conn.user_id(), %group, %err, "failed to join group");
            release(state, &conn).await;
            return Err(ConnectRefusal::Internal);
        }
    }

    state.presence.mark_online(conn.user_id()).await;
    Ok((conn, inbox))
}

async fn run_connection(socket: WebSocket, state: AppState, conn: Arc<Connection>, inbox: Inbox) {
    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);
    let writer = tokio::spawn(writer_task(ws_tx, out_rx));

    conn.set_state(ConnectionState::Open);
    tracing::info!(user_id = conn.user_id(), channel = %conn.channel, "push connection opened");

    let heartbeat = heartbeat::spawn(
        conn.clone(),
        out_tx.clone(),
        state.config.heartbeat_interval,
        state.config.heartbeat_timeout,
    );
    state
        .notifier
        .broadcast(EventType::UserPresenceConnected, presence_data(&conn.user))
        .await;

    let writer = run_session(&state, &conn, ws_rx, inbox, out_tx, writer).await;

    disconnect(&state, &conn, heartbeat).await;

    if let Some(mut writer) = writer {
        if time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

/// Main loop: read client frames and relay group-layer envelopes.
///
/// Returns the writer handle if the writer is still running.
async fn run_session(
    state: &AppState,
    conn: &Connection,
    mut ws_rx: SplitStream<WebSocket>,
    mut inbox: Inbox,
    out_tx: Outbound,
    mut writer: JoinHandle<()>,
) -> Option<JoinHandle<()>> {
    let max_frame_bytes = state.config.max_frame_bytes;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => conn.handle_frame(text.as_bytes(), max_frame_bytes),
                    Some(Ok(Message::Binary(bytes))) => conn.handle_frame(bytes.as_ref(), max_frame_bytes),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, channel = %conn.channel, "ws read error");
                        break;
                    }
                };
                if let Some(reply) = reply {
                    if !conn.enqueue(&out_tx, Message::Text(reply.to_json().into())) {
                        break;
                    }
                }
            }

            envelope = inbox.recv() => {
                match envelope {
                    Some(Envelope::SendMessage { payload }) => {
                        if !conn.enqueue(&out_tx, Message::Text(payload.to_json().into())) {
                            break;
                        }
                    }
                    None => {
                        tracing::info!(channel = %conn.channel, "group layer closed the channel");
                        conn.enqueue(&out_tx, Message::Close(None));
                        break;
                    }
                }
            }

            // Writer finished: socket broken or a close frame went out.
            _ = &mut writer => return None,
        }
    }

    Some(writer)
}

/// Forward queued frames to the socket until the queue ends or a close frame is sent.
async fn writer_task(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_tx.send(msg).await.is_err() {
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// Tear down an open connection. Each step runs even if an earlier one fails.
pub async fn disconnect(state: &AppState, conn: &Connection, heartbeat: JoinHandle<()>) {
    if !conn.begin_closing() {
        return;
    }

    heartbeat::stop(heartbeat).await;
    release(state, conn).await;
    state
        .notifier
        .broadcast(EventType::UserPresenceDisconnected, presence_data(&conn.user))
        .await;

    conn.set_state(ConnectionState::Closed);
    tracing::info!(user_id = conn.user_id(), channel = %conn.channel, "push connection closed");
}

/// Leave both groups, drop the channel and clear presence if this was the
/// user's last connection.
async fn release(state: &AppState, conn: &Connection) {
    for group in conn.groups() {
        if let Err(err) = state.layer.group_discard(group, &conn.channel).await {
            tracing::warn!(user_id = conn.user_id(), %group, %err, "failed to leave group");
        }
    }
    state.layer.close_channel(&conn.channel).await;

    match state.layer.group_size(&conn.personal_group).await {
        Ok(0) => {
            state.presence.mark_offline(conn.user_id()).await;
            // A connection that joined after the count may have been marked
            // online before the removal landed.
            if let Ok(joined @ 1..) = state.layer.group_size(&conn.personal_group).await {
                tracing::debug!(user_id = conn.user_id(), joined, "user reconnected during release");
                state.presence.mark_online(conn.user_id()).await;
            }
        }
        Ok(remaining) => {
            tracing::debug!(user_id = conn.user_id(), remaining, "user still connected elsewhere");
        }
        Err(err) => {
            tracing::warn!(user_id = conn.user_id(), %err, "failed to count connections");
            state.presence.mark_offline(conn.user_id()).await;
        }
    }
}

fn presence_data(user: &User) -> Value {
    serde_json::json!({
        "user_id": user.id,
        "name": user.display_name(),
    })
}
