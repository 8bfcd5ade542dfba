//! Alternate-language sources for transcripts.

use super::insert_transcript_or_reread;
use crate::cache::ResourceCache;
use crate::captions::CaptionSource;
use crate::error::{Result, TldwError};
use crate::resources::{ResourceStore, Transcript};
use tracing::{debug, info, warn};

/// Ordered list of languages to borrow a transcript from.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    order: Vec<String>,
}

impl FallbackChain {
    pub fn new(order: Vec<String>) -> Self {
        Self { order }
    }

    /// Fallback languages to try for `target`, in priority order.
    pub fn alternates<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.order
            .iter()
            .map(String::as_str)
            .filter(move |lang| *lang != target)
    }

    /// First completed transcript in an alternate language, from cache or store.
    pub async fn find_completed(
        &self,
        cache: &ResourceCache,
        resources: &dyn ResourceStore,
        video_id: &str,
        target: &str,
    ) -> Result<Option<Transcript>> {
        for lang in self.alternates(target) {
            if let Some(cached) = cache.cached_transcript(video_id, lang).await {
                if cached.is_completed() {
                    debug!(language = lang, "Fallback transcript found in cache");
                    return Ok(Some(cached));
                }
            }
            if let Some(stored) = resources.find_transcript(video_id, lang).await? {
                if stored.is_completed() {
                    debug!(language = lang, "Fallback transcript found in store");
                    cache.refresh_transcript(&stored).await;
                    return Ok(Some(stored));
                }
            }
        }
        Ok(None)
    }

    /// Fetch captions in each alternate language until one exists, and
    /// persist it as a completed transcript in that language.
    ///
    /// Per-language provider failures count as "not found". Only a missing
    /// tool or an unavailable video stops the search.
    pub async fn fetch_alternate(
        &self,
        captions: &dyn CaptionSource,
        cache: &ResourceCache,
        resources: &dyn ResourceStore,
        video_id: &str,
        target: &str,
    ) -> Result<Option<Transcript>> {
        for lang in self.alternates(target) {
            if let Some(existing) = resources.find_transcript(video_id, lang).await? {
                if existing.is_completed() {
                    return Ok(Some(existing));
                }
                // Someone else owns that language's creation.
                continue;
            }

            let track = match captions.fetch_captions(video_id, lang).await {
                Ok(Some(track)) => track,
                Ok(None) => {
                    debug!(language = lang, "No fallback captions");
                    continue;
                }
                Err(e @ (TldwError::ToolNotFound(_) | TldwError::InvalidInput(_))) => return Err(e),
                Err(e) => {
                    warn!(language = lang, "Fallback caption fetch failed: {}", e);
                    continue;
                }
            };

            info!(language = lang, source = captions.name(), "Fetched fallback captions");
            let transcript = Transcript::completed(video_id, lang, track.text, track.kind.into());
            let stored = insert_transcript_or_reread(resources, transcript).await?;
            cache.refresh_transcript(&stored).await;
            if stored.is_completed() {
                return Ok(Some(stored));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::{CaptionKind, CaptionTrack};
    use crate::config::CacheSettings;
    use crate::resources::{SqliteResourceStore, TranscriptOrigin};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::Mutex;

    struct ScriptedCaptions {
        available: Vec<&'static str>,
        asked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CaptionSource for ScriptedCaptions {
        async fn fetch_captions(&self, _video_id: &str, language: &str) -> Result<Option<CaptionTrack>> {
            self.asked.lock().unwrap().push(language.to_string());
            Ok(self.available.iter().any(|l| *l == language).then(|| CaptionTrack {
                text: format!("captions in {}", language),
                kind: CaptionKind::Manual,
            }))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn chain() -> FallbackChain {
        FallbackChain::new(vec!["en".into(), "tr".into(), "de".into()])
    }

    fn cache() -> ResourceCache {
        ResourceCache::new(Arc::new(MemoryStore::new()), CacheSettings::default())
    }

    #[test]
    fn test_alternates_skip_target() {
        let chain = chain();
        assert_eq!(chain.alternates("en").collect::<Vec<_>>(), vec!["tr", "de"]);
        assert_eq!(chain.alternates("fr").collect::<Vec<_>>(), vec!["en", "tr", "de"]);
    }

    #[tokio::test]
    async fn test_find_completed_skips_unfinished() {
        let store = SqliteResourceStore::in_memory().unwrap();
        store.insert_transcript(&Transcript::pending("v1", "tr")).await.unwrap();
        store
            .insert_transcript(&Transcript::completed("v1", "de", "hallo".into(), TranscriptOrigin::Manual))
            .await
            .unwrap();

        let found = chain().find_completed(&cache(), &store, "v1", "en").await.unwrap().unwrap();
        assert_eq!(found.language, "de");
    }

    #[tokio::test]
    async fn test_fetch_alternate_persists_first_available() {
        let store = SqliteResourceStore::in_memory().unwrap();
        let captions = ScriptedCaptions {
            available: vec!["de"],
            asked: Mutex::new(Vec::new()),
        };

        let found = chain()
            .fetch_alternate(&captions, &cache(), &store, "v1", "fr")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.language, "de");
        assert_eq!(*captions.asked.lock().unwrap(), vec!["en", "tr", "de"]);
        let stored = store.find_transcript("v1", "de").await.unwrap().unwrap();
        assert!(stored.is_completed());
        assert_eq!(stored.origin, TranscriptOrigin::Manual);
    }
}
