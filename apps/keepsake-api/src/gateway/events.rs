//! Event vocabulary and wire-format frames.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Application events pushed to clients. The wire value is the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    MessageCreated,
    MessageDeleted,
    MessageViewed,
    UserPresenceConnected,
    UserPresenceDisconnected,
    BucketpointCreated,
    BucketpointUpdated,
    BucketpointDeleted,
    PhotoUploaded,
    PhotoUpdated,
    PhotoDeleted,
    AlbumCreated,
    AlbumUpdated,
    AlbumDeleted,
    SystemNotification,
}

impl EventType {
    pub const ALL: [EventType; 15] = [
        EventType::MessageCreated,
        EventType::MessageDeleted,
        EventType::MessageViewed,
        EventType::UserPresenceConnected,
        EventType::UserPresenceDisconnected,
        EventType::BucketpointCreated,
        EventType::BucketpointUpdated,
        EventType::BucketpointDeleted,
        EventType::PhotoUploaded,
        EventType::PhotoUpdated,
        EventType::PhotoDeleted,
        EventType::AlbumCreated,
        EventType::AlbumUpdated,
        EventType::AlbumDeleted,
        EventType::SystemNotification,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            EventType::MessageCreated => "MESSAGE_CREATED",
            EventType::MessageDeleted => "MESSAGE_DELETED",
            EventType::MessageViewed => "MESSAGE_VIEWED",
            EventType::UserPresenceConnected => "USER_PRESENCE_CONNECTED",
            EventType::UserPresenceDisconnected => "USER_PRESENCE_DISCONNECTED",
            EventType::BucketpointCreated => "BUCKETPOINT_CREATED",
            EventType::BucketpointUpdated => "BUCKETPOINT_UPDATED",
            EventType::BucketpointDeleted => "BUCKETPOINT_DELETED",
            EventType::PhotoUploaded => "PHOTO_UPLOADED",
            EventType::PhotoUpdated => "PHOTO_UPDATED",
            EventType::PhotoDeleted => "PHOTO_DELETED",
            EventType::AlbumCreated => "ALBUM_CREATED",
            EventType::AlbumUpdated => "ALBUM_UPDATED",
            EventType::AlbumDeleted => "ALBUM_DELETED",
            EventType::SystemNotification => "SYSTEM_NOTIFICATION",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type `{0}`")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// An event type as supplied by a publisher: a known member or a free string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTag {
    Known(EventType),
    Custom(String),
}

impl EventTag {
    pub fn as_str(&self) -> &str {
        match self {
            EventTag::Known(t) => t.as_str(),
            EventTag::Custom(s) => s,
        }
    }
}

impl From<EventType> for EventTag {
    fn from(t: EventType) -> Self {
        EventTag::Known(t)
    }
}

impl From<&str> for EventTag {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(t) => EventTag::Known(t),
            Err(_) => EventTag::Custom(s.to_string()),
        }
    }
}

impl From<String> for EventTag {
    fn from(s: String) -> Self {
        EventTag::from(s.as_str())
    }
}

// ---------------------------------------------------------------------------
// Server → Client frame
// ---------------------------------------------------------------------------

pub const FRAME_PING: &str = "PING";
pub const FRAME_PONG: &str = "PONG";
pub const FRAME_ERROR: &str = "ERROR";

/// A `{type, data}` frame as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl OutboundEvent {
    pub fn new(tag: impl Into<EventTag>, data: Value) -> Self {
        Self {
            event_type: tag.into().as_str().to_string(),
            data,
        }
    }

    /// Liveness check carrying the send time.
    pub fn ping(at: DateTime<Utc>) -> Self {
        Self {
            event_type: FRAME_PING.to_string(),
            data: serde_json::json!({
                "timestamp": at.to_rfc3339_opts(SecondsFormat::Micros, true),
            }),
        }
    }

    /// Protocol-violation notice; the connection stays open.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event_type: FRAME_ERROR.to_string(),
            data: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of a String and a Value always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Group-layer envelope
// ---------------------------------------------------------------------------

/// What travels through the group layer. Connections dispatch on `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "send.message")]
    SendMessage { payload: OutboundEvent },
}

impl Envelope {
    pub fn send_message(payload: OutboundEvent) -> Self {
        Envelope::SendMessage { payload }
    }
}

// ---------------------------------------------------------------------------
// Client → Server frame
// ---------------------------------------------------------------------------

/// Inbound frame types the server recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrameType {
    Pong,
    Event(EventType),
}

impl FromStr for ClientFrameType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == FRAME_PONG {
            return Ok(ClientFrameType::Pong);
        }
        s.parse().map(ClientFrameType::Event)
    }
}

/// Raw shape of a client frame before its type is validated.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(rename = "type", default)]
    pub frame_type: Option<String>,
    #[serde(default)]
    pub data: Value,
}
