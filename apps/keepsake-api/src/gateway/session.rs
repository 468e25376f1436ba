//! Per-connection state and inbound frame handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::extract::ws::Message;
use keepsake_common::{user_group, BROADCAST_GROUP};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::models::user::{User, UserId};

use super::events::{ClientFrame, ClientFrameType, OutboundEvent};

/// Frames waiting for the connection's writer task.
pub type Outbound = mpsc::Sender<Message>;

/// Lifecycle of a push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Open,
    Closing,
    Closed,
}

/// State for a single authenticated push connection.
pub struct Connection {
    /// Inbox name in the group layer.
    pub channel: String,
    pub user: User,
    /// `user_<id>`, computed once at connect.
    pub personal_group: String,
    state: Mutex<ConnectionState>,
    closing: AtomicBool,
    last_pong: Mutex<Instant>,
}

impl Connection {
    pub fn new(channel: String, user: User) -> Self {
        let personal_group = user_group(user.id);
        Self {
            channel,
            user,
            personal_group,
            state: Mutex::new(ConnectionState::Connecting),
            closing: AtomicBool::new(false),
            last_pong: Mutex::new(Instant::now()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    /// The groups this connection belongs to, personal group first.
    pub fn groups(&self) -> [&str; 2] {
        [self.personal_group.as_str(), BROADCAST_GROUP]
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        tracing::debug!(channel = %self.channel, from = ?*state, to = ?next, "connection state");
        *state = next;
    }

    /// Flag the connection as closing. Returns `false` if it already was.
    pub fn begin_closing(&self) -> bool {
        let first = !self.closing.swap(true, Ordering::SeqCst);
        if first {
            self.set_state(ConnectionState::Closing);
        }
        first
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn record_pong(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock()
    }

    /// Queue a frame for the writer without waiting.
    ///
    /// A full queue drops the frame. Returns `false` once the writer is gone.
    pub fn enqueue(&self, outbound: &Outbound, msg: Message) -> bool {
        match outbound.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    user_id = self.user.id,
                    channel = %self.channel,
                    "outbound queue full, dropping frame"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Process one inbound frame. Returns the frame to send back, if any.
    pub fn handle_frame(&self, raw: &[u8], max_frame_bytes: usize) -> Option<OutboundEvent> {
        if raw.len() > max_frame_bytes {
            tracing::warn!(
                user_id = self.user.id,
                size = raw.len(),
                limit = max_frame_bytes,
                "inbound frame too large"
            );
            return Some(OutboundEvent::error("Message too large"));
        }

        let value: Value = match serde_json::from_slice(raw) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(user_id = self.user.id, %err, "inbound frame is not valid JSON");
                return Some(OutboundEvent::error("Invalid JSON"));
            }
        };

        let frame: ClientFrame = match serde_json::from_value(value) {
            Ok(f) => f,
            Err(_) => return Some(OutboundEvent::error("Invalid message format")),
        };

        let Some(frame_type) = frame.frame_type else {
            return Some(OutboundEvent::error("Missing message type"));
        };

        match frame_type.parse::<ClientFrameType>() {
            Ok(ClientFrameType::Pong) => {
                self.record_pong();
                None
            }
            Ok(ClientFrameType::Event(event_type)) => {
                tracing::debug!(
                    user_id = self.user.id,
                    %event_type,
                    data = %frame.data,
                    "client event received"
                );
                None
            }
            Err(err) => {
                tracing::debug!(user_id = self.user.id, %err, "rejecting inbound frame");
                Some(OutboundEvent::error(format!(
                    "Unknown message type: {frame_type}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;

    const MAX: usize = 65_536;

    fn connection() -> Connection {
        Connection::new(
            "conn_test".to_string(),
            User {
                id: 7,
                username: "seven".to_string(),
                first_name: String::new(),
                last_name: String::new(),
                email: String::new(),
                is_active: true,
                date_joined: Utc::now(),
            },
        )
    }

    fn error_message(reply: Option<OutboundEvent>) -> String {
        let reply = reply.expect("expected an ERROR frame");
        assert_eq!(reply.event_type, "ERROR");
        reply.data["message"].as_str().unwrap().to_string()
    }

    #[test]
    fn groups_are_personal_then_broadcast() {
        let conn = connection();
        assert_eq!(conn.groups(), ["user_7", "broadcast"]);
    }

    #[test]
    fn starts_connecting() {
        assert_eq!(connection().state(), ConnectionState::Connecting);
    }

    #[test]
    fn full_outbound_queue_drops_frames() {
        let conn = connection();
        let (tx, mut rx) = mpsc::channel(2);

        for n in 0..5 {
            assert!(conn.enqueue(&tx, Message::Text(n.to_string().into())));
        }

        let mut delivered = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            delivered.push(text.as_str().to_string());
        }
        assert_eq!(delivered, ["0", "1"]);

        // Room again after the writer catches up.
        assert!(conn.enqueue(&tx, Message::Text("5".into())));
        assert!(matches!(rx.try_recv(), Ok(Message::Text(t)) if t.as_str() == "5"));

        drop(rx);
        assert!(!conn.enqueue(&tx, Message::Text("6".into())));
    }

    #[test]
    fn closing_is_set_once() {
        let conn = connection();
        assert!(!conn.is_closing());
        assert!(conn.begin_closing());
        assert!(!conn.begin_closing());
        assert!(conn.is_closing());
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn pong_updates_liveness_without_reply() {
        let conn = connection();
        let before = conn.last_pong();
        std::thread::sleep(Duration::from_millis(5));

        assert!(conn.handle_frame(br#"{"type":"PONG"}"#, MAX).is_none());
        assert!(conn.last_pong() > before);
    }

    #[test]
    fn known_event_is_logged_only() {
        let conn = connection();
        let frame = br#"{"type":"MESSAGE_VIEWED","data":{"id":1}}"#;
        assert!(conn.handle_frame(frame, MAX).is_none());
    }

    #[test]
    fn oversized_frame_gets_one_error() {
        let conn = connection();
        let big = vec![b'a'; MAX + 1];
        assert_eq!(error_message(conn.handle_frame(&big, MAX)), "Message too large");
    }

    #[test]
    fn frame_at_limit_is_parsed() {
        let conn = connection();
        let mut frame = br#"{"type":"PONG","data":""#.to_vec();
        let tail = br#""}"#;
        frame.resize(MAX - tail.len(), b'x');
        frame.extend_from_slice(tail);
        assert_eq!(frame.len(), MAX);
        assert!(conn.handle_frame(&frame, MAX).is_none());
    }

    #[test]
    fn malformed_json_gets_error() {
        let conn = connection();
        assert_eq!(error_message(conn.handle_frame(b"{not json", MAX)), "Invalid JSON");
        assert_eq!(error_message(conn.handle_frame(&[0xff, 0xfe], MAX)), "Invalid JSON");
    }

    #[test]
    fn unknown_or_missing_type_gets_error() {
        let conn = connection();
        assert_eq!(
            error_message(conn.handle_frame(br#"{"type":"DANCE"}"#, MAX)),
            "Unknown message type: DANCE"
        );
        assert_eq!(
            error_message(conn.handle_frame(br#"{"data":{}}"#, MAX)),
            "Missing message type"
        );
        assert_eq!(
            error_message(conn.handle_frame(b"[1,2]", MAX)),
            "Invalid message format"
        );
    }
}
