//! Shared online/offline registry.
//!
//! Presence is a single set of user ids in the backing store. Membership is
//! a hint, not a guarantee: a crashed process can leave stale members, which
//! age out with the TTL on the whole set. Store failures are logged and
//! degrade to "offline" or no-op; they never reach the caller.

use std::sync::Arc;

use crate::db::kv::SetStore;
use crate::models::user::UserId;

/// Name of the set holding online user ids.
pub const ONLINE_USERS_KEY: &str = "online_users";

#[derive(Clone)]
pub struct Presence {
    store: Arc<dyn SetStore>,
    ttl_secs: u64,
}

impl Presence {
    pub fn new(store: Arc<dyn SetStore>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    pub async fn mark_online(&self, user_id: UserId) {
        if let Err(err) = self
            .store
            .add(ONLINE_USERS_KEY, &user_id.to_string(), self.ttl_secs)
            .await
        {
            tracing::error!(user_id, %err, "failed to mark user online");
        }
    }

    pub async fn mark_offline(&self, user_id: UserId) {
        if let Err(err) = self
            .store
            .remove(ONLINE_USERS_KEY, &user_id.to_string())
            .await
        {
            tracing::error!(user_id, %err, "failed to mark user offline");
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        match self
            .store
            .contains(ONLINE_USERS_KEY, &user_id.to_string())
            .await
        {
            Ok(online) => online,
            Err(err) => {
                tracing::error!(user_id, %err, "failed to read presence");
                false
            }
        }
    }

    /// Release the backing store connection.
    pub async fn close(&self) {
        self.store.close().await;
    }
}
