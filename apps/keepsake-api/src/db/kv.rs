use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;

/// Upper bound on a single store round trip, connection setup included.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure talking to the backing set store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connect(#[source] redis::RedisError),
    #[error("store command failed: {0}")]
    Command(#[from] redis::RedisError),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
}

/// Abstraction over a shared store of named sets with a TTL on the whole set.
///
/// Backed by Redis in production and an in-memory map in tests.
#[async_trait]
pub trait SetStore: Send + Sync {
    /// Add `member` to `key` and (re)arm the TTL of the whole set.
    async fn add(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), StoreError>;
    async fn remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Release the underlying connection. Later calls may reconnect.
    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

/// Redis-backed set store.
///
/// The connection is opened on first use rather than at construction, so
/// building the store never touches the network. Every command, including
/// the connect that may precede it, is bounded by `timeout`. `close` drops
/// the connection; the next command reconnects.
pub struct RedisStore {
    url: String,
    timeout: Duration,
    conn: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, DEFAULT_STORE_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            conn: RwLock::new(None),
        }
    }

    /// Cached connection, or a fresh one. Concurrent first callers may each
    /// connect; the first to finish is kept.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let cached = self.conn.read().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let client = redis::Client::open(self.url.as_str()).map_err(StoreError::Connect)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::Connect)?;

        let mut guard = self.conn.write();
        if guard.is_none() {
            tracing::info!("redis connection established");
        }
        Ok(guard.get_or_insert(conn).clone())
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl SetStore for RedisStore {
    async fn add(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.sadd::<_, _, ()>(key, member).await?;
            conn.expire::<_, ()>(key, ttl_secs as i64).await?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        use redis::AsyncCommands;
        self.bounded(async {
            let mut conn = self.connection().await?;
            conn.srem::<_, _, ()>(key, member).await?;
            Ok(())
        })
        .await
    }

    async fn contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        use redis::AsyncCommands;
        self.bounded(async {
            let mut conn = self.connection().await?;
            Ok(conn.sismember(key, member).await?)
        })
        .await
    }

    async fn close(&self) {
        if self.conn.write().take().is_some() {
            tracing::info!("redis connection closed");
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and single-process dev runs)
// ---------------------------------------------------------------------------

struct MemorySet {
    members: Vec<String>,
    expires_at: Instant,
}

pub struct MemoryStore {
    data: Mutex<HashMap<String, MemorySet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SetStore for MemoryStore {
    async fn add(&self, key: &str, member: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let set = data.entry(key.to_string()).or_insert_with(|| MemorySet {
            members: Vec::new(),
            expires_at: now,
        });
        if set.expires_at <= now {
            set.members.clear();
        }
        if !set.members.iter().any(|m| m == member) {
            set.members.push(member.to_string());
        }
        set.expires_at = now + Duration::from_secs(ttl_secs);
        Ok(())
    }

    async fn remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock();
        if let Some(set) = data.get_mut(key) {
            set.members.retain(|m| m != member);
            if set.members.is_empty() {
                data.remove(key);
            }
        }
        Ok(())
    }

    async fn contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let data = self.data.lock();
        Ok(data
            .get(key)
            .filter(|set| set.expires_at > Instant::now())
            .is_some_and(|set| set.members.iter().any(|m| m == member)))
    }
}
