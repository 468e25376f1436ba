//! Best-effort event publishing for business code.
//!
//! Callers never see a failure: a missing layer is a no-op and publish
//! errors are logged. There is no retry, queueing or confirmation.

use std::sync::Arc;

use keepsake_common::{user_group, BROADCAST_GROUP};
use serde_json::Value;

use crate::db::users::UserDirectory;
use crate::models::user::UserId;

use super::events::{Envelope, EventTag, OutboundEvent};
use super::layer::GroupLayer;

#[derive(Clone)]
pub struct Notifier {
    layer: Option<Arc<dyn GroupLayer>>,
}

impl Notifier {
    pub fn new(layer: Arc<dyn GroupLayer>) -> Self {
        Self { layer: Some(layer) }
    }

    /// A notifier with no fan-out configured; every send is a no-op.
    pub fn disabled() -> Self {
        Self { layer: None }
    }

    /// Publish one `{type, data}` event to a group.
    pub async fn publish(&self, group: &str, tag: impl Into<EventTag>, data: Value) {
        let Some(layer) = &self.layer else {
            tracing::debug!(%group, "no group layer configured, skipping publish");
            return;
        };

        let event = OutboundEvent::new(tag, data);
        let event_type = event.event_type.clone();
        if let Err(err) = layer.group_send(group, Envelope::send_message(event)).await {
            tracing::error!(%group, %event_type, %err, "failed to publish event");
        }
    }

    /// Push an event to every connection of one user.
    pub async fn send_to_user(&self, user_id: UserId, tag: impl Into<EventTag>, data: Value) {
        self.publish(&user_group(user_id), tag, data).await;
    }

    /// [`send_to_user`](Self::send_to_user) for each id, in order.
    pub async fn broadcast_to_users(
        &self,
        user_ids: &[UserId],
        tag: impl Into<EventTag>,
        data: Value,
    ) {
        let tag = tag.into();
        for &user_id in user_ids {
            self.send_to_user(user_id, tag.clone(), data.clone()).await;
        }
    }

    /// Push an event to every user in the directory.
    pub async fn notify_all_users(
        &self,
        users: &dyn UserDirectory,
        tag: impl Into<EventTag>,
        data: Value,
    ) {
        match users.list_ids().await {
            Ok(ids) => self.broadcast_to_users(&ids, tag, data).await,
            Err(err) => tracing::error!(%err, "failed to list users for notification"),
        }
    }

    /// Push an event to every authenticated connection.
    pub async fn broadcast(&self, tag: impl Into<EventTag>, data: Value) {
        self.publish(BROADCAST_GROUP, tag, data).await;
    }
}
