//! Short-TTL mutual exclusion over the shared key-value store.
//!
//! A lock is a token at `lock:<kind>:<video>:<language>`. The TTL bounds how
//! long a crashed holder can block others; failing to acquire is an expected
//! outcome ("someone else is on it"), not an error.

use crate::error::Result;
use crate::resources::ResourceKind;
use crate::store::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Composite lock identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub kind: ResourceKind,
    pub video_id: String,
    pub language: String,
}

impl LockKey {
    pub fn new(kind: ResourceKind, video_id: &str, language: &str) -> Self {
        Self {
            kind,
            video_id: video_id.to_string(),
            language: language.to_string(),
        }
    }

    /// Storage key for this lock.
    pub fn storage_key(&self) -> String {
        format!("lock:{}:{}:{}", self.kind, self.video_id, self.language)
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.video_id, self.language)
    }
}

/// Distributed lock service.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Take the lock if nobody holds it. Returns false if it is held.
    pub async fn acquire(&self, key: &LockKey) -> Result<bool> {
        let token = Uuid::new_v4().to_string();
        let acquired = self.store.set_nx(&key.storage_key(), &token, Some(self.ttl)).await?;
        debug!(lock = %key, acquired, "Lock acquire");
        Ok(acquired)
    }

    /// Drop the lock regardless of holder.
    pub async fn release(&self, key: &LockKey) -> Result<()> {
        self.store.delete(&key.storage_key()).await?;
        debug!(lock = %key, "Lock released");
        Ok(())
    }

    /// Whether the lock is currently held.
    pub async fn is_locked(&self, key: &LockKey) -> Result<bool> {
        self.store.exists(&key.storage_key()).await
    }
}
