//! Read-through / write-through cache for transcripts and summaries.
//!
//! The cache is never the source of truth: every failure here is logged and
//! treated as a miss, and every durable write goes to the resource store first.

use crate::config::CacheSettings;
use crate::error::Result;
use crate::resources::{ResourceKind, ResourceStatus, Summary, Transcript, TranscriptOrigin};
use crate::store::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache key: resource kind + video + language (+ optional discriminator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub kind: ResourceKind,
    pub video_id: String,
    pub language: String,
    pub discriminator: Option<String>,
}

impl CacheKey {
    pub fn new(kind: ResourceKind, video_id: &str, language: &str) -> Self {
        Self {
            kind,
            video_id: video_id.to_string(),
            language: language.to_string(),
            discriminator: None,
        }
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    pub fn storage_key(&self) -> String {
        match &self.discriminator {
            Some(d) => format!("cache:{}:{}:{}:{}", self.kind, self.video_id, self.language, d),
            None => format!("cache:{}:{}:{}", self.kind, self.video_id, self.language),
        }
    }
}

/// TTL-based resource cache over the shared key-value store.
#[derive(Clone)]
pub struct ResourceCache {
    store: Arc<dyn KvStore>,
    settings: CacheSettings,
}

impl ResourceCache {
    pub fn new(store: Arc<dyn KvStore>, settings: CacheSettings) -> Self {
        Self { store, settings }
    }

    /// Read a cached value. Errors and undecodable entries count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let storage_key = key.storage_key();
        match self.store.get(&storage_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %storage_key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %storage_key, "Discarding undecodable cache entry: {}", e);
                    self.invalidate(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %storage_key, "Cache read failed: {}", e);
                None
            }
        }
    }

    /// Write a value with a TTL. Failures are logged and swallowed.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let storage_key = key.storage_key();
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(key = %storage_key, "Failed to encode cache entry: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(&storage_key, &encoded, Some(ttl)).await {
            warn!(key = %storage_key, "Cache write failed: {}", e);
        }
    }

    /// Remove an entry. Failures are logged and swallowed.
    pub async fn invalidate(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(&key.storage_key()).await {
            warn!(key = %key.storage_key(), "Cache invalidation failed: {}", e);
        }
    }

    /// Read-through: consult the cache, fall back to `load`, then populate.
    ///
    /// `ttl` decides per value how long it may live; `None` skips caching.
    pub async fn read_through<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: impl Fn(&T) -> Option<Duration>,
        load: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(Some(hit));
        }

        let loaded = load().await?;
        if let Some(value) = &loaded {
            if let Some(ttl) = ttl(value) {
                self.set(key, value, ttl).await;
            }
        }
        Ok(loaded)
    }

    /// TTL for a transcript snapshot, or `None` if it should not be cached.
    pub fn transcript_ttl(&self, transcript: &Transcript) -> Option<Duration> {
        match transcript.status {
            ResourceStatus::Completed if transcript.origin == TranscriptOrigin::Manual => {
                Some(Duration::from_secs(self.settings.manual_transcript_ttl_secs))
            }
            ResourceStatus::Completed => Some(Duration::from_secs(self.settings.transcript_ttl_secs)),
            ResourceStatus::Pending | ResourceStatus::Processing => {
                Some(Duration::from_secs(self.settings.volatile_ttl_secs))
            }
            ResourceStatus::Failed => None,
        }
    }

    /// TTL for a summary snapshot, or `None` if it should not be cached.
    pub fn summary_ttl(&self, summary: &Summary) -> Option<Duration> {
        match summary.status {
            ResourceStatus::Completed => Some(Duration::from_secs(self.settings.summary_ttl_secs)),
            ResourceStatus::Pending | ResourceStatus::Processing => {
                Some(Duration::from_secs(self.settings.volatile_ttl_secs))
            }
            ResourceStatus::Failed => None,
        }
    }

    pub fn transcript_key(video_id: &str, language: &str) -> CacheKey {
        CacheKey::new(ResourceKind::Transcript, video_id, language)
    }

    pub fn summary_key(video_id: &str, language: &str) -> CacheKey {
        CacheKey::new(ResourceKind::Summary, video_id, language)
    }

    /// Refresh the cached snapshot after a store write.
    pub async fn refresh_transcript(&self, transcript: &Transcript) {
        let key = Self::transcript_key(&transcript.video_id, &transcript.language);
        match self.transcript_ttl(transcript) {
            Some(ttl) => self.set(&key, transcript, ttl).await,
            None => self.invalidate(&key).await,
        }
    }

    /// Refresh the cached snapshot after a store write.
    pub async fn refresh_summary(&self, summary: &Summary) {
        let key = Self::summary_key(&summary.video_id, &summary.language);
        match self.summary_ttl(summary) {
            Some(ttl) => self.set(&key, summary, ttl).await,
            None => self.invalidate(&key).await,
        }
    }

    pub async fn cached_transcript(&self, video_id: &str, language: &str) -> Option<Transcript> {
        self.get(&Self::transcript_key(video_id, language)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ResourceStore, SqliteResourceStore};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn cache() -> ResourceCache {
        ResourceCache::new(Arc::new(MemoryStore::new()), CacheSettings::default())
    }

    #[tokio::test]
    async fn test_ttl_selection() {
        let cache = cache();
        let manual = Transcript::completed("v1", "en", "x".into(), TranscriptOrigin::Manual);
        let auto = Transcript::completed("v1", "en", "x".into(), TranscriptOrigin::Automatic);
        let pending = Transcript::pending("v1", "en");
        let mut failed = Transcript::pending("v1", "en");
        failed.status = ResourceStatus::Failed;

        assert!(cache.transcript_ttl(&manual) > cache.transcript_ttl(&auto));
        assert!(cache.transcript_ttl(&auto) > cache.transcript_ttl(&pending));
        assert_eq!(cache.transcript_ttl(&failed), None);
    }

    #[tokio::test]
    async fn test_invalidated_entry_reloads_identically_from_store() {
        let cache = cache();
        let store = SqliteResourceStore::in_memory().unwrap();
        let transcript = Transcript::completed("v1", "en", "Same text.".into(), TranscriptOrigin::Automatic);
        store.insert_transcript(&transcript).await.unwrap();

        let key = ResourceCache::transcript_key("v1", "en");
        let first = cache
            .read_through(&key, |t| cache.transcript_ttl(t), || store.find_transcript("v1", "en"))
            .await
            .unwrap()
            .unwrap();
        assert!(cache.cached_transcript("v1", "en").await.is_some());

        cache.invalidate(&key).await;
        assert!(cache.cached_transcript("v1", "en").await.is_none());

        let second = cache
            .read_through(&key, |t| cache.transcript_ttl(t), || store.find_transcript("v1", "en"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second, transcript);
    }

    #[tokio::test]
    async fn test_failed_resources_are_evicted_on_refresh() {
        let cache = cache();
        let mut transcript = Transcript::pending("v1", "en");
        cache.refresh_transcript(&transcript).await;
        assert!(cache.cached_transcript("v1", "en").await.is_some());

        transcript.status = ResourceStatus::Failed;
        cache.refresh_transcript(&transcript).await;
        assert!(cache.cached_transcript("v1", "en").await.is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl KvStore for BrokenStore {
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<()> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn set_nx(&self, _: &str, _: &str, _: Option<Duration>) -> Result<bool> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn incr(&self, _: &str, _: Option<Duration>) -> Result<i64> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn push_back(&self, _: &str, _: &str) -> Result<()> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn pop_front(&self, _: &str) -> Result<Option<String>> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn list_remove(&self, _: &str, _: &str) -> Result<usize> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn list_len(&self, _: &str) -> Result<usize> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn zadd(&self, _: &str, _: &str, _: i64) -> Result<()> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn zrem(&self, _: &str, _: &str) -> Result<bool> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn zrange_by_score(&self, _: &str, _: i64, _: usize) -> Result<Vec<String>> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn zcard(&self, _: &str) -> Result<usize> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(crate::error::TldwError::KeyValue("down".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_cache_falls_back_to_store() {
        let cache = ResourceCache::new(Arc::new(BrokenStore), CacheSettings::default());
        let store = SqliteResourceStore::in_memory().unwrap();
        let transcript = Transcript::completed("v1", "en", "text".into(), TranscriptOrigin::Manual);
        store.insert_transcript(&transcript).await.unwrap();

        let loaded = cache
            .read_through(
                &ResourceCache::transcript_key("v1", "en"),
                |t| cache.transcript_ttl(t),
                || store.find_transcript("v1", "en"),
            )
            .await
            .unwrap();
        assert_eq!(loaded, Some(transcript));
    }

    #[test]
    fn test_storage_key_layout() {
        let key = CacheKey::new(ResourceKind::Summary, "v1", "en").with_discriminator("public");
        assert_eq!(key.storage_key(), "cache:summary:v1:en:public");
    }
}
