//! Pipeline orchestrator for tldw.
//!
//! Answers transcript and summary requests from the cache, the resource store,
//! an alternate-language translation, or a new queued job, and owns the job
//! handlers that produce the resources.

mod fallback;
mod handlers;

pub use fallback::FallbackChain;
pub use handlers::{SummaryHandler, TranscriptHandler, TranslationHandler};

use crate::cache::ResourceCache;
use crate::captions::{CaptionSource, YoutubeCaptionSource};
use crate::config::{Prompts, QueueSettings, Settings};
use crate::error::{Result, StoreError, TldwError};
use crate::generation::{CredentialGateway, OpenAIGenerator, TextGenerator};
use crate::language;
use crate::lock::{DistributedLock, LockKey};
use crate::queue::{JobPayload, Queues, WorkerPool};
use crate::resources::{
    QueryStatus, ResourceKind, ResourceStatus, ResourceStore, SqliteResourceStore, StatusView,
    Summary, Transcript, TranscriptOrigin,
};
use crate::store::{self, KvStore};
use crate::summarizer::Summarizer;
use crate::translation::Translator;
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Rows and jobs removed by [`Orchestrator::delete`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub transcript: bool,
    pub summary: bool,
    pub jobs: usize,
}

/// The main orchestrator for the tldw pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    resources: Arc<dyn ResourceStore>,
    cache: ResourceCache,
    lock: DistributedLock,
    queues: Queues,
    captions: Arc<dyn CaptionSource>,
    summarizer: Arc<Summarizer>,
    translator: Arc<Translator>,
    fallback: FallbackChain,
    stale_after: Duration,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl Orchestrator {
    /// Connect to the configured stores and providers.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let kv = store::connect(settings).await?;
        Self::with_store(settings, kv)
    }

    /// Build production components over an existing key-value store.
    pub fn with_store(settings: &Settings, kv: Arc<dyn KvStore>) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let resources: Arc<dyn ResourceStore> =
            Arc::new(SqliteResourceStore::new(&settings.sqlite_path())?);

        let gateway = CredentialGateway::new(kv.clone(), &settings.generation);
        if gateway.credentials().is_empty() {
            warn!("No API credentials configured; summaries and translations will fail");
        }
        let generator: Arc<dyn TextGenerator> =
            Arc::new(OpenAIGenerator::new(gateway, &settings.generation)?);

        let temp_dir = settings.temp_dir();
        std::fs::create_dir_all(&temp_dir)?;
        let captions: Arc<dyn CaptionSource> =
            Arc::new(YoutubeCaptionSource::new(&settings.youtube, temp_dir));

        Ok(Self::with_components(settings, kv, resources, captions, generator, prompts))
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        settings: &Settings,
        kv: Arc<dyn KvStore>,
        resources: Arc<dyn ResourceStore>,
        captions: Arc<dyn CaptionSource>,
        generator: Arc<dyn TextGenerator>,
        prompts: Prompts,
    ) -> Self {
        let summarizer = Summarizer::new(generator.clone(), prompts.clone(), settings.summarizer.clone());
        let translator = Translator::new(generator, prompts, &settings.summarizer);

        Self {
            resources,
            cache: ResourceCache::new(kv.clone(), settings.cache.clone()),
            lock: DistributedLock::new(kv.clone(), Duration::from_secs(settings.lock.ttl_secs)),
            queues: Queues::new(kv, &settings.queue),
            captions,
            summarizer: Arc::new(summarizer),
            translator: Arc::new(translator),
            fallback: FallbackChain::new(settings.languages.fallback_order.clone()),
            stale_after: Duration::from_secs(settings.summarizer.stale_after_secs),
            wait_timeout: settings.summarizer.wait_timeout(),
            poll_interval: Duration::from_millis(settings.server.poll_interval_ms),
        }
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// One worker pool per queue, sized from `settings`.
    pub fn worker_pools(&self, settings: &QueueSettings) -> Vec<WorkerPool> {
        vec![
            WorkerPool::new(
                self.queues.transcript.clone(),
                Arc::new(TranscriptHandler::new(self.clone())),
                settings.transcript_concurrency,
                settings.poll_interval(),
                settings.stalled_interval(),
            ),
            WorkerPool::new(
                self.queues.summary.clone(),
                Arc::new(SummaryHandler::new(self.clone())),
                settings.summary_concurrency,
                settings.poll_interval(),
                settings.stalled_interval(),
            ),
            WorkerPool::new(
                self.queues.translation.clone(),
                Arc::new(TranslationHandler::new(self.clone())),
                settings.translation_concurrency,
                settings.poll_interval(),
                settings.stalled_interval(),
            ),
        ]
    }

    /// Create (or return) the resource of `kind` for (video, language).
    pub async fn request(&self, kind: ResourceKind, video_id: &str, language: &str) -> Result<StatusView> {
        match kind {
            ResourceKind::Transcript => self.request_transcript(video_id, language).await,
            ResourceKind::Summary => self.request_summary(video_id, language).await,
            ResourceKind::Translation => Err(translation_kind_error()),
        }
    }

    /// Current state of the resource of `kind` for (video, language).
    pub async fn status(&self, kind: ResourceKind, video_id: &str, language: &str) -> Result<StatusView> {
        let (video_id, language) = validate_target(video_id, language)?;
        let view = match kind {
            ResourceKind::Transcript => self
                .load_transcript(&video_id, &language)
                .await?
                .map(|t| StatusView::from(&t)),
            ResourceKind::Summary => self
                .load_summary(&video_id, &language)
                .await?
                .map(|s| StatusView::from(&s)),
            ResourceKind::Translation => return Err(translation_kind_error()),
        };
        Ok(view.unwrap_or_else(|| StatusView::not_found(kind, &video_id, &language)))
    }

    /// Request a transcript.
    #[instrument(skip(self))]
    pub async fn request_transcript(&self, video_id: &str, language: &str) -> Result<StatusView> {
        let (video_id, language) = validate_target(video_id, language)?;

        if let Some(existing) = self.load_transcript(&video_id, &language).await? {
            let stale = existing.is_stale(Utc::now(), self.stale_after);
            if !self.is_restartable(existing.status, stale) {
                debug!(status = %existing.status, "Transcript already known");
                return Ok(StatusView::from(&existing));
            }
        }

        let key = LockKey::new(ResourceKind::Transcript, &video_id, &language);
        let created = self
            .with_lock(&key, || self.create_transcript(&video_id, &language))
            .await?;
        Ok(created.unwrap_or_else(|| in_progress(ResourceKind::Transcript, &video_id, &language)))
    }

    /// Request a summary. Runs the transcript path first when needed.
    #[instrument(skip(self))]
    pub async fn request_summary(&self, video_id: &str, language: &str) -> Result<StatusView> {
        let (video_id, language) = validate_target(video_id, language)?;

        if let Some(existing) = self.load_summary(&video_id, &language).await? {
            let restartable = existing.status == ResourceStatus::Failed
                || existing.is_stale(Utc::now(), self.stale_after);
            if !restartable {
                debug!(status = %existing.status, "Summary already known");
                return Ok(StatusView::from(&existing));
            }
        }

        let key = LockKey::new(ResourceKind::Summary, &video_id, &language);
        let created = self
            .with_lock(&key, || self.create_summary(&video_id, &language))
            .await?;
        Ok(created.unwrap_or_else(|| in_progress(ResourceKind::Summary, &video_id, &language)))
    }

    /// Reset a failed or stale resource to `pending` and requeue its job.
    ///
    /// Completed resources are returned unchanged.
    #[instrument(skip(self))]
    pub async fn restart(&self, kind: ResourceKind, video_id: &str, language: &str) -> Result<StatusView> {
        let (video_id, language) = validate_target(video_id, language)?;
        let key = LockKey::new(kind, &video_id, &language);
        let (video, lang) = (video_id.as_str(), language.as_str());

        let restarted = match kind {
            ResourceKind::Transcript => {
                self.with_lock(&key, || async move {
                    match self.resources.find_transcript(video, lang).await? {
                        Some(t) if self.is_restartable(t.status, t.is_stale(Utc::now(), self.stale_after)) => {
                            self.restart_transcript(t).await
                        }
                        Some(t) => Ok(StatusView::from(&t)),
                        None => Ok(StatusView::not_found(kind, video, lang)),
                    }
                })
                .await?
            }
            ResourceKind::Summary => {
                self.with_lock(&key, || async move {
                    match self.resources.find_summary(video, lang).await? {
                        Some(s) if self.is_restartable(s.status, s.is_stale(Utc::now(), self.stale_after)) => {
                            self.restart_summary(s).await
                        }
                        Some(s) => Ok(StatusView::from(&s)),
                        None => Ok(StatusView::not_found(kind, video, lang)),
                    }
                })
                .await?
            }
            ResourceKind::Translation => return Err(translation_kind_error()),
        };
        Ok(restarted.unwrap_or_else(|| in_progress(kind, &video_id, &language)))
    }

    /// Remove the transcript and summary for (video, language), their cache
    /// entries and their jobs.
    #[instrument(skip(self))]
    pub async fn delete(&self, video_id: &str, language: &str) -> Result<DeleteReport> {
        let (video_id, language) = validate_target(video_id, language)?;

        let report = DeleteReport {
            transcript: self.resources.delete_transcript(&video_id, &language).await?,
            summary: self.resources.delete_summary(&video_id, &language).await?,
            jobs: self.remove_jobs(&video_id, &language).await?,
        };
        self.cache.invalidate(&ResourceCache::transcript_key(&video_id, &language)).await;
        self.cache.invalidate(&ResourceCache::summary_key(&video_id, &language)).await;

        info!(?report, "Deleted resources");
        Ok(report)
    }

    /// Request a summary and poll until it is terminal or the deadline passes.
    ///
    /// On timeout the job keeps running; only the wait is abandoned.
    pub async fn create_summary_and_wait(&self, video_id: &str, language: &str) -> Result<StatusView> {
        let deadline = self.wait_timeout;
        tokio::time::timeout(deadline, async {
            let view = self.request_summary(video_id, language).await?;
            self.poll_until_terminal(ResourceKind::Summary, video_id, language, view).await
        })
        .await
        .map_err(|_| TldwError::Timeout(deadline))?
    }

    /// Poll the resource until it is terminal or `timeout` passes.
    pub async fn wait_for(
        &self,
        kind: ResourceKind,
        video_id: &str,
        language: &str,
        timeout: Duration,
    ) -> Result<StatusView> {
        tokio::time::timeout(timeout, async {
            let view = self.status(kind, video_id, language).await?;
            self.poll_until_terminal(kind, video_id, language, view).await
        })
        .await
        .map_err(|_| TldwError::Timeout(timeout))?
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    async fn poll_until_terminal(
        &self,
        kind: ResourceKind,
        video_id: &str,
        language: &str,
        mut view: StatusView,
    ) -> Result<StatusView> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.tick().await;
        while !view.status.is_terminal() {
            interval.tick().await;
            view = self.status(kind, video_id, language).await?;
            if view.status == QueryStatus::NotFound {
                // Deleted or never created while we waited.
                view = self.request(kind, video_id, language).await?;
            }
        }
        Ok(view)
    }

    fn is_restartable(&self, status: ResourceStatus, stale: bool) -> bool {
        status == ResourceStatus::Failed || stale
    }

    /// Run `work` while holding `key`. `None` means someone else holds it.
    async fn with_lock<T, F, Fut>(&self, key: &LockKey, work: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.lock.acquire(key).await? {
            debug!(lock = %key, "Lock held elsewhere, reporting in progress");
            return Ok(None);
        }

        let result = work().await;
        if let Err(e) = self.lock.release(key).await {
            warn!(lock = %key, "Failed to release lock: {}", e);
        }
        result.map(Some)
    }

    async fn load_transcript(&self, video_id: &str, language: &str) -> Result<Option<Transcript>> {
        self.cache
            .read_through(
                &ResourceCache::transcript_key(video_id, language),
                |t| self.cache.transcript_ttl(t),
                || self.resources.find_transcript(video_id, language),
            )
            .await
    }

    async fn load_summary(&self, video_id: &str, language: &str) -> Result<Option<Summary>> {
        self.cache
            .read_through(
                &ResourceCache::summary_key(video_id, language),
                |s| self.cache.summary_ttl(s),
                || self.resources.find_summary(video_id, language),
            )
            .await
    }

    /// Transcript creation under the lock.
    async fn create_transcript(&self, video_id: &str, language: &str) -> Result<StatusView> {
        match self.resources.find_transcript(video_id, language).await? {
            Some(t) if self.is_restartable(t.status, t.is_stale(Utc::now(), self.stale_after)) => {
                return self.restart_transcript(t).await
            }
            Some(t) => {
                self.cache.refresh_transcript(&t).await;
                return Ok(StatusView::from(&t));
            }
            None => {}
        }

        if let Some(source) = self
            .fallback
            .find_completed(&self.cache, self.resources.as_ref(), video_id, language)
            .await?
        {
            match self.translate_transcript(&source, language).await {
                Ok(translated) => return Ok(StatusView::from(&translated)),
                Err(e) => warn!(source = %source.language, "Inline translation failed, queueing creation: {}", e),
            }
        }

        let transcript =
            insert_transcript_or_reread(self.resources.as_ref(), Transcript::pending(video_id, language)).await?;
        self.cache.refresh_transcript(&transcript).await;
        if !transcript.is_completed() {
            self.queues.enqueue(JobPayload::transcript(video_id, language)).await?;
        }
        Ok(StatusView::from(&transcript))
    }

    /// Translate a completed transcript into `language` and store it.
    async fn translate_transcript(&self, source: &Transcript, language: &str) -> Result<Transcript> {
        info!(from = %source.language, to = language, "Translating transcript");
        let text = self.translator.translate(&source.text, &source.language, language).await?;
        let translated = Transcript::completed(
            &source.video_id,
            language,
            text,
            TranscriptOrigin::Translated(source.language.clone()),
        );

        let stored = insert_transcript_or_reread(self.resources.as_ref(), translated).await?;
        self.cache.refresh_transcript(&stored).await;
        if stored.is_completed() {
            self.enqueue_summary(&stored).await;
        }
        Ok(stored)
    }

    async fn restart_transcript(&self, mut transcript: Transcript) -> Result<StatusView> {
        info!(id = %transcript.id, from = %transcript.status, "Restarting transcript");
        transcript.transition(ResourceStatus::Pending)?;
        self.resources.update_transcript(&transcript).await?;
        self.cache.refresh_transcript(&transcript).await;
        self.queues
            .requeue(JobPayload::transcript(&transcript.video_id, &transcript.language))
            .await?;
        Ok(StatusView::from(&transcript))
    }

    /// Summary creation under the lock.
    async fn create_summary(&self, video_id: &str, language: &str) -> Result<StatusView> {
        if let Some(existing) = self.resources.find_summary(video_id, language).await? {
            if self.is_restartable(existing.status, existing.is_stale(Utc::now(), self.stale_after)) {
                return self.restart_summary(existing).await;
            }
            self.cache.refresh_summary(&existing).await;
            return Ok(StatusView::from(&existing));
        }

        let transcript_view = self.request_transcript(video_id, language).await?;
        let transcript_id = (transcript_view.status == QueryStatus::Completed)
            .then_some(transcript_view.id)
            .flatten();

        let summary = insert_summary_or_reread(
            self.resources.as_ref(),
            Summary::pending(video_id, language, transcript_id),
        )
        .await?;
        self.cache.refresh_summary(&summary).await;

        match transcript_id {
            Some(id) if !summary.is_completed() => {
                self.queues.enqueue(JobPayload::summary(video_id, language, id)).await?;
            }
            Some(_) => {}
            None => debug!(transcript = ?transcript_view.status, "Summary waits for its transcript"),
        }
        Ok(StatusView::from(&summary))
    }

    async fn restart_summary(&self, mut summary: Summary) -> Result<StatusView> {
        info!(id = %summary.id, from = %summary.status, "Restarting summary");
        let transcript = self
            .resources
            .find_transcript(&summary.video_id, &summary.language)
            .await?
            .filter(Transcript::is_completed);

        summary.transition(ResourceStatus::Pending)?;
        summary.content = None;
        if let Some(t) = &transcript {
            summary.transcript_id = Some(t.id);
        }
        self.resources.update_summary(&summary).await?;
        self.cache.refresh_summary(&summary).await;

        match transcript {
            Some(t) => {
                self.queues
                    .requeue(JobPayload::summary(&summary.video_id, &summary.language, t.id))
                    .await?
            }
            None => {
                self.request_transcript(&summary.video_id, &summary.language).await?;
            }
        }
        Ok(StatusView::from(&summary))
    }

    /// Best-effort summary job for a completed transcript.
    pub(crate) async fn enqueue_summary(&self, transcript: &Transcript) {
        let payload = JobPayload::summary(&transcript.video_id, &transcript.language, transcript.id);
        if let Err(e) = self.queues.enqueue(payload).await {
            warn!(video = %transcript.video_id, language = %transcript.language, "Failed to enqueue summary job: {}", e);
        }
    }

    async fn remove_jobs(&self, video_id: &str, language: &str) -> Result<usize> {
        let mut removed = 0;
        for kind in [ResourceKind::Transcript, ResourceKind::Summary, ResourceKind::Translation] {
            let id = format!("{}:{}:{}", kind, video_id, language);
            if self.queues.for_kind(kind).remove(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Reject malformed ids and normalize the language code.
fn validate_target(video_id: &str, language: &str) -> Result<(String, String)> {
    let video_id = video_id.trim();
    if video_id.is_empty()
        || !video_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TldwError::InvalidInput(format!("Invalid video id: {:?}", video_id)));
    }

    let language = language::normalize(language);
    if !language::is_valid_code(&language) {
        return Err(TldwError::InvalidInput(format!("Invalid language code: {:?}", language)));
    }
    Ok((video_id.to_string(), language))
}

fn in_progress(kind: ResourceKind, video_id: &str, language: &str) -> StatusView {
    StatusView {
        status: QueryStatus::Processing,
        ..StatusView::not_found(kind, video_id, language)
    }
}

fn translation_kind_error() -> TldwError {
    TldwError::InvalidInput(
        "translations are requested as a transcript or summary in the target language".to_string(),
    )
}

/// Insert a transcript; on a unique-constraint race return the winner's row.
pub(crate) async fn insert_transcript_or_reread(
    resources: &dyn ResourceStore,
    transcript: Transcript,
) -> Result<Transcript> {
    match resources.insert_transcript(&transcript).await {
        Ok(()) => Ok(transcript),
        Err(TldwError::Store(StoreError::Conflict(_))) => {
            debug!(video = %transcript.video_id, language = %transcript.language, "Lost insert race, re-reading");
            resources
                .find_transcript(&transcript.video_id, &transcript.language)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "transcript {}/{} after conflict",
                        transcript.video_id, transcript.language
                    ))
                    .into()
                })
        }
        Err(e) => Err(e),
    }
}

/// Insert a summary; on a unique-constraint race return the winner's row.
pub(crate) async fn insert_summary_or_reread(
    resources: &dyn ResourceStore,
    summary: Summary,
) -> Result<Summary> {
    match resources.insert_summary(&summary).await {
        Ok(()) => Ok(summary),
        Err(TldwError::Store(StoreError::Conflict(_))) => {
            debug!(video = %summary.video_id, language = %summary.language, "Lost insert race, re-reading");
            resources
                .find_summary(&summary.video_id, &summary.language)
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "summary {}/{} after conflict",
                        summary.video_id, summary.language
                    ))
                    .into()
                })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captions::{CaptionKind, CaptionTrack};
    use crate::generation::testing::FnGenerator;
    use crate::queue::{reclaim_stalled, JobHandler, JobQueue, STALLED_ERROR};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeCaptions {
        tracks: HashMap<&'static str, &'static str>,
        calls: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl FakeCaptions {
        fn with(tracks: &[(&'static str, &'static str)]) -> Self {
            Self {
                tracks: tracks.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl CaptionSource for FakeCaptions {
        async fn fetch_captions(&self, _video_id: &str, language: &str) -> Result<Option<CaptionTrack>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            Ok(self.tracks.get(language).map(|text| CaptionTrack {
                text: text.to_string(),
                kind: CaptionKind::Manual,
            }))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        resources: Arc<SqliteResourceStore>,
        captions: Arc<FakeCaptions>,
        generator: Arc<FnGenerator>,
    }

    fn harness_with(settings: Settings, captions: FakeCaptions) -> Harness {
        let resources = Arc::new(SqliteResourceStore::in_memory().unwrap());
        let captions = Arc::new(captions);
        let generator = Arc::new(FnGenerator::new(|_, request| {
            if request.system.contains("translator") {
                Ok(format!("translated: {}", request.user))
            } else {
                Ok("A concise summary.".to_string())
            }
        }));
        let orchestrator = Orchestrator::with_components(
            &settings,
            Arc::new(crate::store::MemoryStore::new()),
            resources.clone(),
            captions.clone(),
            generator.clone(),
            Prompts::default(),
        );
        Harness {
            orchestrator,
            resources,
            captions,
            generator,
        }
    }

    fn harness(captions: FakeCaptions) -> Harness {
        harness_with(Settings::default(), captions)
    }

    async fn run_next(queue: &JobQueue, handler: &dyn JobHandler) -> Result<()> {
        let job = queue.reserve().await.unwrap().expect("a waiting job");
        let result = handler.handle(&job.record).await;
        if result.is_ok() {
            queue.complete(&job).await.unwrap();
        }
        result
    }

    async fn waiting(queue: &JobQueue) -> usize {
        queue.counts().await.unwrap().waiting
    }

    #[tokio::test]
    async fn test_new_transcript_goes_pending_processing_completed() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(FakeCaptions {
            gate: Some(gate.clone()),
            ..FakeCaptions::with(&[("en", "Hello and welcome to the show.")])
        });
        let o = &h.orchestrator;

        let view = o.request_transcript("v1", "en").await.unwrap();
        assert_eq!(view.status, QueryStatus::Pending);
        assert!(view.id.is_some());
        assert_eq!(waiting(&o.queues.transcript).await, 1);

        let job = o.queues.transcript.reserve().await.unwrap().unwrap();
        let handler = TranscriptHandler::new(o.clone());
        let task = tokio::spawn(async move { handler.handle(&job.record).await });

        let mut seen_processing = false;
        for _ in 0..100 {
            if o.status(ResourceKind::Transcript, "v1", "en").await.unwrap().status == QueryStatus::Processing {
                seen_processing = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(seen_processing);

        gate.add_permits(1);
        task.await.unwrap().unwrap();

        let done = o.status(ResourceKind::Transcript, "v1", "en").await.unwrap();
        assert_eq!(done.status, QueryStatus::Completed);
        assert_eq!(done.content.as_deref(), Some("Hello and welcome to the show."));
        assert_eq!(done.origin.as_deref(), Some("manual"));
        assert_eq!(waiting(&o.queues.summary).await, 1);
    }

    #[tokio::test]
    async fn test_existing_fallback_language_is_translated_inline() {
        let h = harness(FakeCaptions::with(&[("en", "native english")]));
        h.resources
            .insert_transcript(&Transcript::completed(
                "v1",
                "tr",
                "Merhaba dünya.".into(),
                TranscriptOrigin::Manual,
            ))
            .await
            .unwrap();

        let view = h.orchestrator.request_transcript("v1", "en").await.unwrap();

        assert_eq!(view.status, QueryStatus::Completed);
        assert_eq!(view.origin.as_deref(), Some("translated:tr"));
        assert_eq!(view.content.as_deref(), Some("translated: Merhaba dünya."));
        assert_eq!(h.captions.calls.load(Ordering::SeqCst), 0);
        assert_eq!(waiting(&h.orchestrator.queues.transcript).await, 0);
        assert_eq!(waiting(&h.orchestrator.queues.summary).await, 1);
    }

    #[tokio::test]
    async fn test_simultaneous_requests_enqueue_one_job() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;

        let (a, b) = tokio::join!(o.request_transcript("v1", "en"), o.request_transcript("v1", "en"));

        for view in [a.unwrap(), b.unwrap()] {
            assert!(matches!(view.status, QueryStatus::Pending | QueryStatus::Processing));
        }
        assert_eq!(waiting(&o.queues.transcript).await, 1);
    }

    #[tokio::test]
    async fn test_held_lock_reports_in_progress() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;
        let key = LockKey::new(ResourceKind::Transcript, "v1", "en");
        assert!(o.lock.acquire(&key).await.unwrap());

        let view = o.request_transcript("v1", "en").await.unwrap();

        assert_eq!(view.status, QueryStatus::Processing);
        assert!(view.id.is_none());
        assert_eq!(waiting(&o.queues.transcript).await, 0);
        assert!(h.resources.find_transcript("v1", "en").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summary_waits_for_transcript_then_completes() {
        let h = harness(FakeCaptions::with(&[("en", "Some transcript text.")]));
        let o = &h.orchestrator;

        let view = o.request_summary("v1", "en").await.unwrap();
        assert_eq!(view.status, QueryStatus::Pending);
        assert_eq!(waiting(&o.queues.transcript).await, 1);
        assert_eq!(waiting(&o.queues.summary).await, 0);

        run_next(&o.queues.transcript, &TranscriptHandler::new(o.clone())).await.unwrap();
        assert_eq!(waiting(&o.queues.summary).await, 1);

        run_next(&o.queues.summary, &SummaryHandler::new(o.clone())).await.unwrap();
        let done = o.status(ResourceKind::Summary, "v1", "en").await.unwrap();
        assert_eq!(done.status, QueryStatus::Completed);
        assert_eq!(done.content.as_deref(), Some("A concise summary."));
    }

    #[tokio::test]
    async fn test_stale_summary_is_restarted() {
        let h = harness(FakeCaptions::default());
        let transcript = Transcript::completed("v1", "en", "text".into(), TranscriptOrigin::Manual);
        h.resources.insert_transcript(&transcript).await.unwrap();

        let mut stuck = Summary::pending("v1", "en", Some(transcript.id));
        stuck.status = ResourceStatus::Processing;
        stuck.updated_at = Utc::now() - chrono::Duration::minutes(31);
        h.resources.insert_summary(&stuck).await.unwrap();

        let view = h.orchestrator.request_summary("v1", "en").await.unwrap();

        assert_eq!(view.status, QueryStatus::Pending);
        assert_eq!(view.id, Some(stuck.id));
        assert_eq!(waiting(&h.orchestrator.queues.summary).await, 1);
    }

    #[tokio::test]
    async fn test_fresh_and_completed_summaries_are_not_restarted() {
        let h = harness(FakeCaptions::default());
        let mut processing = Summary::pending("v1", "en", None);
        processing.status = ResourceStatus::Processing;
        h.resources.insert_summary(&processing).await.unwrap();

        let mut completed = Summary::pending("v2", "en", None);
        completed.status = ResourceStatus::Completed;
        completed.content = Some("done".into());
        completed.updated_at = Utc::now() - chrono::Duration::hours(5);
        h.resources.insert_summary(&completed).await.unwrap();

        let o = &h.orchestrator;
        assert_eq!(o.request_summary("v1", "en").await.unwrap().status, QueryStatus::Processing);
        let view = o.request_summary("v2", "en").await.unwrap();
        assert_eq!(view.status, QueryStatus::Completed);
        assert_eq!(view.content.as_deref(), Some("done"));
        assert_eq!(waiting(&o.queues.summary).await, 0);

        let restarted = o.restart(ResourceKind::Summary, "v2", "en").await.unwrap();
        assert_eq!(restarted.status, QueryStatus::Completed);
    }

    #[tokio::test]
    async fn test_invalidated_cache_refetches_from_store() {
        let h = harness(FakeCaptions::default());
        h.resources
            .insert_transcript(&Transcript::completed("v1", "en", "stable text".into(), TranscriptOrigin::Manual))
            .await
            .unwrap();
        let o = &h.orchestrator;

        let first = o.status(ResourceKind::Transcript, "v1", "en").await.unwrap();
        assert!(o.cache.cached_transcript("v1", "en").await.is_some());

        o.cache.invalidate(&ResourceCache::transcript_key("v1", "en")).await;
        let second = o.status(ResourceKind::Transcript, "v1", "en").await.unwrap();

        assert_eq!(first.content, second.content);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_missing_captions_fail_then_restart() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;
        o.request_transcript("v1", "en").await.unwrap();

        let err = run_next(&o.queues.transcript, &TranscriptHandler::new(o.clone())).await.unwrap_err();
        assert!(matches!(err, TldwError::NoCaptions(_)));
        assert!(!err.is_retryable());

        let failed = o.status(ResourceKind::Transcript, "v1", "en").await.unwrap();
        assert_eq!(failed.status, QueryStatus::Failed);
        assert!(failed.error.is_some());

        let restarted = o.restart(ResourceKind::Transcript, "v1", "en").await.unwrap();
        assert_eq!(restarted.status, QueryStatus::Pending);
        assert_eq!(restarted.id, failed.id);
        assert_eq!(waiting(&o.queues.transcript).await, 1);
    }

    #[tokio::test]
    async fn test_transcript_fails_when_job_stalls_out_and_can_be_requested_again() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;
        let handler = TranscriptHandler::new(o.clone());
        o.request_transcript("v1", "en").await.unwrap();
        let far_future = Utc::now().timestamp_millis() + 3_600_000;

        for _ in 0..2 {
            o.queues.transcript.reserve().await.unwrap().expect("a waiting job");
            let mut row = h.resources.find_transcript("v1", "en").await.unwrap().unwrap();
            if row.status != ResourceStatus::Processing {
                row.transition(ResourceStatus::Processing).unwrap();
                h.resources.update_transcript(&row).await.unwrap();
            }
            reclaim_stalled(&o.queues.transcript, &handler, far_future).await.unwrap();
        }

        let failed = o.status(ResourceKind::Transcript, "v1", "en").await.unwrap();
        assert_eq!(failed.status, QueryStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some(STALLED_ERROR));
        assert_eq!(o.queues.transcript.counts().await.unwrap(), Default::default());

        let again = o.request_transcript("v1", "en").await.unwrap();
        assert_eq!(again.status, QueryStatus::Pending);
        assert_eq!(again.id, failed.id);
        assert_eq!(waiting(&o.queues.transcript).await, 1);
    }

    #[tokio::test]
    async fn test_stale_transcript_is_restarted() {
        let h = harness(FakeCaptions::default());
        let mut stuck = Transcript::pending("v1", "en");
        stuck.status = ResourceStatus::Processing;
        stuck.updated_at = Utc::now() - chrono::Duration::minutes(31);
        h.resources.insert_transcript(&stuck).await.unwrap();

        let view = h.orchestrator.request_transcript("v1", "en").await.unwrap();

        assert_eq!(view.status, QueryStatus::Pending);
        assert_eq!(view.id, Some(stuck.id));
        assert_eq!(waiting(&h.orchestrator.queues.transcript).await, 1);
    }

    #[tokio::test]
    async fn test_summary_without_source_transcript_is_marked_failed() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;
        let pending = Summary::pending("v1", "en", None);
        h.resources.insert_summary(&pending).await.unwrap();
        o.queues
            .summary
            .enqueue(JobPayload::summary("v1", "en", uuid::Uuid::new_v4()))
            .await
            .unwrap();

        let handler = SummaryHandler::new(o.clone());
        let err = run_next(&o.queues.summary, &handler).await.unwrap_err();
        assert!(matches!(err, TldwError::Summarization(_)));

        let job = o.queues.summary.get("summary:v1:en").await.unwrap().unwrap();
        let retried = handler.handle(&job).await.unwrap_err();
        assert!(matches!(retried, TldwError::Summarization(_)));

        let row = h.resources.find_summary("v1", "en").await.unwrap().unwrap();
        assert_eq!(row.status, ResourceStatus::Failed);
        assert_eq!(row.error, Some(err.to_string()));
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_worker_fetches_alternate_language_when_native_missing() {
        let h = harness(FakeCaptions::with(&[("tr", "Türkçe altyazı.")]));
        let o = &h.orchestrator;
        o.request_transcript("v1", "en").await.unwrap();

        run_next(&o.queues.transcript, &TranscriptHandler::new(o.clone())).await.unwrap();

        let en = o.status(ResourceKind::Transcript, "v1", "en").await.unwrap();
        assert_eq!(en.status, QueryStatus::Completed);
        assert_eq!(en.origin.as_deref(), Some("translated:tr"));
        let tr = h.resources.find_transcript("v1", "tr").await.unwrap().unwrap();
        assert!(tr.is_completed());
    }

    #[tokio::test]
    async fn test_summary_is_translated_from_source_language() {
        let h = harness(FakeCaptions::default());
        let tr = Transcript::completed("v1", "tr", "Metin.".into(), TranscriptOrigin::Manual);
        h.resources.insert_transcript(&tr).await.unwrap();
        let mut tr_summary = Summary::pending("v1", "tr", Some(tr.id));
        tr_summary.status = ResourceStatus::Completed;
        tr_summary.content = Some("Özet.".into());
        h.resources.insert_summary(&tr_summary).await.unwrap();
        let o = &h.orchestrator;

        let view = o.request_summary("v1", "en").await.unwrap();
        assert_eq!(view.status, QueryStatus::Pending);
        assert_eq!(waiting(&o.queues.summary).await, 1);

        run_next(&o.queues.summary, &SummaryHandler::new(o.clone())).await.unwrap();

        let done = o.status(ResourceKind::Summary, "v1", "en").await.unwrap();
        assert_eq!(done.content.as_deref(), Some("translated: Özet."));
        let requests = h.generator.requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.system.contains("translator")));
    }

    #[tokio::test]
    async fn test_translation_job_translates_transcript() {
        let h = harness(FakeCaptions::default());
        h.resources
            .insert_transcript(&Transcript::completed("v1", "en", "Hello.".into(), TranscriptOrigin::Manual))
            .await
            .unwrap();
        let o = &h.orchestrator;
        o.queues
            .enqueue(JobPayload::translation("v1", "en", "de", ResourceKind::Transcript))
            .await
            .unwrap();

        run_next(&o.queues.translation, &TranslationHandler::new(o.clone())).await.unwrap();

        let de = h.resources.find_transcript("v1", "de").await.unwrap().unwrap();
        assert!(de.is_completed());
        assert_eq!(de.text, "translated: Hello.");
        assert_eq!(de.origin, TranscriptOrigin::Translated("en".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_without_workers() {
        let mut settings = Settings::default();
        settings.summarizer.wait_timeout_secs = 5;
        let h = harness_with(settings, FakeCaptions::with(&[("en", "text")]));

        let err = h.orchestrator.create_summary_and_wait("v1", "en").await.unwrap_err();

        assert!(matches!(err, TldwError::Timeout(_)));
        // The request itself still went through.
        assert_eq!(waiting(&h.orchestrator.queues.transcript).await, 1);
    }

    #[tokio::test]
    async fn test_delete_removes_rows_jobs_and_cache() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;
        o.request_summary("v1", "en").await.unwrap();

        let report = o.delete("v1", "en").await.unwrap();

        assert!(report.transcript);
        assert!(report.summary);
        assert_eq!(report.jobs, 1);
        assert_eq!(
            o.status(ResourceKind::Transcript, "v1", "en").await.unwrap().status,
            QueryStatus::NotFound
        );
        assert_eq!(
            o.status(ResourceKind::Summary, "v1", "en").await.unwrap().status,
            QueryStatus::NotFound
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_targets() {
        let h = harness(FakeCaptions::default());
        let o = &h.orchestrator;
        assert!(o.request_transcript("", "en").await.is_err());
        assert!(o.request_transcript("v1/../x", "en").await.is_err());
        assert!(o.request_transcript("v1", "english").await.is_err());
        assert!(o.request(ResourceKind::Translation, "v1", "en").await.is_err());
    }
}
