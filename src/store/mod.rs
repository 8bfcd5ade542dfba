//! Shared key-value store abstraction.
//!
//! Every piece of cross-process coordination (locks, cache entries, job queues,
//! credential state) lives behind this trait so that several worker processes
//! observe the same state. Redis backs it in production; the in-memory
//! implementation serves tests and single-process deployments.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use crate::config::Settings;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Primitive operations the pipeline needs from the shared store.
///
/// Scores in sorted sets are milliseconds since the Unix epoch.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a string value, replacing any previous one.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Write a string value only if the key is absent. Returns true if written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Delete a key. Returns true if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Increment an integer counter, applying `ttl` when the counter is created.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64>;

    /// Append to the tail of a list.
    async fn push_back(&self, list: &str, value: &str) -> Result<()>;

    /// Pop from the head of a list.
    async fn pop_front(&self, list: &str) -> Result<Option<String>>;

    /// Remove every occurrence of `value` from a list.
    async fn list_remove(&self, list: &str, value: &str) -> Result<usize>;

    /// Length of a list.
    async fn list_len(&self, list: &str) -> Result<usize>;

    /// Add or update a sorted-set member.
    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()>;

    /// Remove a sorted-set member. Returns true if it was present.
    async fn zrem(&self, set: &str, member: &str) -> Result<bool>;

    /// Members with a score `<= max`, lowest first.
    async fn zrange_by_score(&self, set: &str, max: i64, limit: usize) -> Result<Vec<String>>;

    /// Number of members in a sorted set.
    async fn zcard(&self, set: &str) -> Result<usize>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Connect to the configured shared store.
///
/// An empty Redis URL selects the in-process store, which only coordinates
/// tasks inside a single process.
pub async fn connect(settings: &Settings) -> Result<Arc<dyn KvStore>> {
    if settings.redis.url.trim().is_empty() {
        tracing::warn!("No Redis URL configured, using in-process key-value store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = RedisStore::connect(&settings.redis.url, &settings.redis.key_prefix).await?;
    Ok(Arc::new(store))
}
