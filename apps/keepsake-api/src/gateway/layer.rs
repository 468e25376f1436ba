//! Group layer: named fan-out addresses over per-connection inboxes.
//!
//! Each connection owns one channel (an inbox). Channels join groups by name,
//! and a send to a group is copied into the inbox of every member. Delivery
//! is at-most-once: a full or closed inbox drops the envelope.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use keepsake_common::id::{prefix, prefixed_ulid};
use tokio::sync::mpsc;

use super::events::Envelope;

/// Envelopes buffered per connection before new ones are dropped.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

pub type Inbox = mpsc::Receiver<Envelope>;

#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("group layer is closed")]
    Closed,
}

/// Join/leave/publish over opaque group names.
#[async_trait]
pub trait GroupLayer: Send + Sync {
    /// Allocate a fresh channel name and the inbox that receives its envelopes.
    async fn new_channel(&self) -> Result<(String, Inbox), LayerError>;
    async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError>;
    /// Leave a group. Leaving a group the channel is not in is not an error.
    async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError>;
    async fn group_send(&self, group: &str, envelope: Envelope) -> Result<(), LayerError>;
    /// Number of channels currently in `group`.
    async fn group_size(&self, group: &str) -> Result<usize, LayerError>;
    /// Forget a channel. Its inbox sees end-of-stream once drained.
    async fn close_channel(&self, channel: &str);
}

// ---------------------------------------------------------------------------
// In-process implementation
// ---------------------------------------------------------------------------

pub struct InMemoryLayer {
    capacity: usize,
    channels: DashMap<String, mpsc::Sender<Envelope>>,
    groups: DashMap<String, HashSet<String>>,
    closed: AtomicBool,
}

impl InMemoryLayer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
            groups: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Stop accepting work and drop every inbox sender.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.clear();
        self.groups.clear();
    }

    fn ensure_open(&self) -> Result<(), LayerError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(LayerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GroupLayer for InMemoryLayer {
    async fn new_channel(&self) -> Result<(String, Inbox), LayerError> {
        self.ensure_open()?;
        let name = prefixed_ulid(prefix::CHANNEL);
        let (tx, rx) = mpsc::channel(self.capacity);
        self.channels.insert(name.clone(), tx);
        Ok((name, rx))
    }

    async fn group_add(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        self.ensure_open()?;
        if !self.channels.contains_key(channel) {
            return Err(LayerError::UnknownChannel(channel.to_string()));
        }
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(channel.to_string());
        Ok(())
    }

    async fn group_discard(&self, group: &str, channel: &str) -> Result<(), LayerError> {
        self.ensure_open()?;
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(channel);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
        Ok(())
    }

    async fn group_send(&self, group: &str, envelope: Envelope) -> Result<(), LayerError> {
        self.ensure_open()?;
        // Snapshot the members so no map guard is held while sending.
        let members: Vec<String> = match self.groups.get(group) {
            Some(members) => members.iter().cloned().collect(),
            None => return Ok(()),
        };

        for channel in members {
            let Some(tx) = self.channels.get(&channel).map(|tx| tx.clone()) else {
                continue;
            };
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(%group, %channel, "inbox full, dropping envelope");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(%group, %channel, "inbox closed, dropping envelope");
                }
            }
        }
        Ok(())
    }

    async fn group_size(&self, group: &str) -> Result<usize, LayerError> {
        self.ensure_open()?;
        Ok(self.groups.get(group).map(|m| m.len()).unwrap_or(0))
    }

    async fn close_channel(&self, channel: &str) {
        self.channels.remove(channel);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::gateway::events::OutboundEvent;

    fn envelope(tag: &str) -> Envelope {
        Envelope::send_message(OutboundEvent::new(tag, json!({ "n": 1 })))
    }

    #[tokio::test]
    async fn send_reaches_every_member_once() {
        let layer = InMemoryLayer::new();
        let (a, mut rx_a) = layer.new_channel().await.unwrap();
        let (b, mut rx_b) = layer.new_channel().await.unwrap();
        let (_c, mut rx_c) = layer.new_channel().await.unwrap();

        layer.group_add("user_1", &a).await.unwrap();
        layer.group_add("user_1", &b).await.unwrap();
        layer.group_send("user_1", envelope("MESSAGE_CREATED")).await.unwrap();

        assert_eq!(rx_a.try_recv().unwrap(), envelope("MESSAGE_CREATED"));
        assert_eq!(rx_b.try_recv().unwrap(), envelope("MESSAGE_CREATED"));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_empty_group_is_ok() {
        let layer = InMemoryLayer::new();
        layer.group_send("nobody", envelope("X")).await.unwrap();
        assert_eq!(layer.group_size("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn discard_stops_delivery_and_shrinks_group() {
        let layer = InMemoryLayer::new();
        let (a, mut rx_a) = layer.new_channel().await.unwrap();
        layer.group_add("broadcast", &a).await.unwrap();
        assert_eq!(layer.group_size("broadcast").await.unwrap(), 1);

        layer.group_discard("broadcast", &a).await.unwrap();
        layer.group_discard("broadcast", &a).await.unwrap();
        assert_eq!(layer.group_size("broadcast").await.unwrap(), 0);

        layer.group_send("broadcast", envelope("X")).await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn join_requires_a_known_channel() {
        let layer = InMemoryLayer::new();
        let err = layer.group_add("user_1", "conn_missing").await.unwrap_err();
        assert!(matches!(err, LayerError::UnknownChannel(_)));
    }

    #[tokio::test]
    async fn full_inbox_drops_instead_of_blocking() {
        let layer = InMemoryLayer::with_capacity(1);
        let (a, mut rx_a) = layer.new_channel().await.unwrap();
        layer.group_add("g", &a).await.unwrap();

        layer.group_send("g", envelope("FIRST")).await.unwrap();
        layer.group_send("g", envelope("SECOND")).await.unwrap();

        assert_eq!(rx_a.try_recv().unwrap(), envelope("FIRST"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_ends_its_inbox() {
        let layer = InMemoryLayer::new();
        let (a, mut rx_a) = layer.new_channel().await.unwrap();
        layer.close_channel(&a).await;
        assert!(rx_a.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_layer_rejects_work() {
        let layer = InMemoryLayer::new();
        let (_a, mut rx_a) = layer.new_channel().await.unwrap();
        layer.close();

        assert!(matches!(layer.new_channel().await, Err(LayerError::Closed)));
        assert!(matches!(
            layer.group_send("g", envelope("X")).await,
            Err(LayerError::Closed)
        ));
        assert!(rx_a.recv().await.is_none());
    }
}
