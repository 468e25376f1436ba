use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::OptionalExtension;
use parking_lot::RwLock;

use crate::db::pool::DbPool;
use crate::db::schema::auth_user;
use crate::error::ApiError;
use crate::models::user::{User, UserId};

/// Read-only access to the user table.
///
/// Backed by PostgreSQL in production and an in-memory map in tests.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find(&self, id: UserId) -> Result<Option<User>, ApiError>;
    /// Every user id, ascending.
    async fn list_ids(&self) -> Result<Vec<UserId>, ApiError>;
    /// The lowest-id user other than `id`.
    async fn first_other(&self, id: UserId) -> Result<Option<User>, ApiError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementation
// ---------------------------------------------------------------------------

pub struct PgUserDirectory {
    pool: DbPool,
}

impl PgUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find(&self, id: UserId) -> Result<Option<User>, ApiError> {
        let mut conn = self.pool.get().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            auth_user::table.find(id).select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, ApiError> {
        let mut conn = self.pool.get().await?;
        let ids = diesel_async::RunQueryDsl::load(
            auth_user::table
                .select(auth_user::id)
                .order(auth_user::id.asc()),
            &mut conn,
        )
        .await?;
        Ok(ids)
    }

    async fn first_other(&self, id: UserId) -> Result<Option<User>, ApiError> {
        let mut conn = self.pool.get().await?;
        let user = diesel_async::RunQueryDsl::first(
            auth_user::table
                .filter(auth_user::id.ne(id))
                .order(auth_user::id.asc())
                .select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests)
// ---------------------------------------------------------------------------

pub struct MemoryUserDirectory {
    users: RwLock<BTreeMap<UserId, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, user: User) {
        self.users.write().insert(user.id, user);
    }

    pub fn remove(&self, id: UserId) {
        self.users.write().remove(&id);
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find(&self, id: UserId) -> Result<Option<User>, ApiError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<UserId>, ApiError> {
        Ok(self.users.read().keys().copied().collect())
    }

    async fn first_other(&self, id: UserId) -> Result<Option<User>, ApiError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.id != id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn user(id: UserId, username: &str) -> User {
        User {
            id,
            username: username.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            email: format!("{username}@example.com"),
            is_active: true,
            date_joined: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_directory_find_and_list() {
        let dir = MemoryUserDirectory::new();
        dir.insert(user(3, "c"));
        dir.insert(user(1, "a"));
        dir.insert(user(2, "b"));

        assert_eq!(dir.find(2).await.unwrap().unwrap().username, "b");
        assert!(dir.find(9).await.unwrap().is_none());
        assert_eq!(dir.list_ids().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn first_other_skips_requester_and_orders_by_id() {
        let dir = MemoryUserDirectory::new();
        dir.insert(user(1, "a"));
        dir.insert(user(2, "b"));
        dir.insert(user(3, "c"));

        assert_eq!(dir.first_other(1).await.unwrap().unwrap().id, 2);
        assert_eq!(dir.first_other(2).await.unwrap().unwrap().id, 1);

        let lonely = MemoryUserDirectory::new();
        lonely.insert(user(1, "a"));
        assert!(lonely.first_other(1).await.unwrap().is_none());
    }
}
