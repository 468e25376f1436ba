//! Periodic PING frames and optional missed-pong enforcement.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::events::OutboundEvent;
use super::session::{Connection, Outbound};

/// Close code sent when a client stops answering PINGs.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4009;

/// Start the heartbeat for an open connection.
///
/// Every `interval` a PING is queued on `outbound` until the connection is
/// flagged closing or the writer is gone. A PING that finds the queue full is
/// skipped. With `timeout` set, a connection whose last pong is older than
/// `interval + timeout` is sent a close frame.
pub fn spawn(
    conn: Arc<Connection>,
    outbound: Outbound,
    interval: Duration,
    timeout: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(run(conn, outbound, interval, timeout))
}

async fn run(
    conn: Arc<Connection>,
    outbound: Outbound,
    interval: Duration,
    timeout: Option<Duration>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // First tick fires immediately; skip it.

    loop {
        ticker.tick().await;
        if conn.is_closing() {
            break;
        }

        if let Some(timeout) = timeout {
            let silent_for = conn.last_pong().elapsed();
            if silent_for > interval + timeout {
                tracing::info!(
                    user_id = conn.user_id(),
                    channel = %conn.channel,
                    silent_ms = silent_for.as_millis() as u64,
                    close_code = CLOSE_HEARTBEAT_TIMEOUT,
                    "heartbeat timeout, closing connection"
                );
                let _ = outbound
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_HEARTBEAT_TIMEOUT,
                        reason: "Heartbeat timeout".into(),
                    })))
                    .await;
                break;
            }
        }

        let ping = OutboundEvent::ping(Utc::now());
        if !conn.enqueue(&outbound, Message::Text(ping.to_json().into())) {
            break;
        }
    }
}

/// Cancel a heartbeat task and wait for it to finish.
pub async fn stop(handle: JoinHandle<()>) {
    handle.abort();
    match handle.await {
        Ok(()) => {}
        Err(err) if err.is_cancelled() => {}
        Err(err) => tracing::error!(?err, "heartbeat task failed"),
    }
}
