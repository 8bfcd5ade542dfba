//! Durable at-least-once job queue over the shared key-value store.
//!
//! Layout per queue kind:
//!
//! - `queue:<kind>:job:<id>` - JSON [`JobRecord`]
//! - `queue:<kind>:wait` - list of ready job ids
//! - `queue:<kind>:delayed` - sorted set, score = ready-at (ms)
//! - `queue:<kind>:active` - sorted set, score = lease deadline (ms)
//!
//! Job ids are deterministic (`<kind>:<video>:<language>`), which makes
//! [`JobQueue::enqueue`] idempotent for a given resource.

mod worker;

pub use worker::{JobHandler, WorkerPool};
#[cfg(test)]
pub(crate) use worker::reclaim_stalled;

use crate::config::QueueSettings;
use crate::error::{Result, TldwError};
use crate::language;
use crate::resources::ResourceKind;
use crate::store::KvStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Upper bound on ids moved per promotion or stall sweep.
const SWEEP_BATCH: usize = 100;

/// Error recorded on a job that kept losing its lease.
pub const STALLED_ERROR: &str = "job stalled more than allowable limit";

/// Create a transcript for (video, language).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptJob {
    pub video_id: String,
    pub language: String,
}

/// Summarize the completed transcript for (video, language).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryJob {
    pub video_id: String,
    pub language: String,
    pub transcript_id: Uuid,
}

/// Translate a completed resource from `source_language` into `target_language`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationJob {
    pub video_id: String,
    pub source_language: String,
    pub target_language: String,
    /// Which resource to translate (transcript or summary).
    pub resource: ResourceKind,
}

/// Work item carried by a job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Transcript(TranscriptJob),
    Summary(SummaryJob),
    Translation(TranslationJob),
}

impl JobPayload {
    pub fn transcript(video_id: &str, language: &str) -> Self {
        JobPayload::Transcript(TranscriptJob {
            video_id: video_id.to_string(),
            language: language.to_string(),
        })
    }

    pub fn summary(video_id: &str, language: &str, transcript_id: Uuid) -> Self {
        JobPayload::Summary(SummaryJob {
            video_id: video_id.to_string(),
            language: language.to_string(),
            transcript_id,
        })
    }

    pub fn translation(
        video_id: &str,
        source_language: &str,
        target_language: &str,
        resource: ResourceKind,
    ) -> Self {
        JobPayload::Translation(TranslationJob {
            video_id: video_id.to_string(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            resource,
        })
    }

    /// The queue this payload belongs on.
    pub fn kind(&self) -> ResourceKind {
        match self {
            JobPayload::Transcript(_) => ResourceKind::Transcript,
            JobPayload::Summary(_) => ResourceKind::Summary,
            JobPayload::Translation(_) => ResourceKind::Translation,
        }
    }

    pub fn video_id(&self) -> &str {
        match self {
            JobPayload::Transcript(job) => &job.video_id,
            JobPayload::Summary(job) => &job.video_id,
            JobPayload::Translation(job) => &job.video_id,
        }
    }

    /// The language of the resource this job produces.
    pub fn language(&self) -> &str {
        match self {
            JobPayload::Transcript(job) => &job.language,
            JobPayload::Summary(job) => &job.language,
            JobPayload::Translation(job) => &job.target_language,
        }
    }

    /// Deterministic id: `<kind>:<video>:<language>`.
    pub fn job_id(&self) -> String {
        format!("{}:{}:{}", self.kind(), self.video_id(), self.language())
    }

    /// Reject payloads no handler could act on.
    pub fn validate(&self) -> Result<()> {
        if self.video_id().trim().is_empty() {
            return Err(TldwError::InvalidJob("video id is empty".to_string()));
        }
        if !language::is_valid_code(self.language()) {
            return Err(TldwError::InvalidJob(format!(
                "malformed language code: {:?}",
                self.language()
            )));
        }
        if let JobPayload::Translation(job) = self {
            if !language::is_valid_code(&job.source_language) {
                return Err(TldwError::InvalidJob(format!(
                    "malformed source language code: {:?}",
                    job.source_language
                )));
            }
            if job.source_language == job.target_language {
                return Err(TldwError::InvalidJob(
                    "translation source and target languages are the same".to_string(),
                ));
            }
            if job.resource == ResourceKind::Translation {
                return Err(TldwError::InvalidJob(
                    "only transcripts and summaries can be translated".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Lifecycle of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Persisted job state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub payload: JobPayload,
    pub state: JobState,
    /// Attempts started so far.
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub stalled_count: u32,
    pub last_error: Option<String>,
    /// Token of the worker currently holding the job.
    pub lease: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    fn new(payload: JobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: payload.job_id(),
            payload,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts,
            stalled_count: 0,
            last_error: None,
            lease: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }
}

/// A job reserved by a worker, identified by its lease token.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub record: JobRecord,
    pub lease: String,
}

impl ActiveJob {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Added,
    /// A live or completed record already exists in this state.
    Duplicate(JobState),
}

/// Result of [`JobQueue::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { delay: Duration },
    Failed,
    /// The lease was lost; someone else owns the job now.
    Stale,
}

/// Result of [`JobQueue::reclaim_stalled_at`].
#[derive(Debug, Clone, Default)]
pub struct Reclaimed {
    /// Ids moved back to waiting.
    pub requeued: Vec<String>,
    /// Records failed for stalling too often.
    pub failed: Vec<JobRecord>,
}

impl Reclaimed {
    pub fn len(&self) -> usize {
        self.requeued.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sizes of the queue's collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
}

/// Retry and lease policy for one queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub attempts: u32,
    pub backoff: Duration,
    pub lock_duration: Duration,
    pub max_stalled_count: u32,
    pub keep_finished: Duration,
}

impl From<&QueueSettings> for QueueOptions {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            attempts: settings.attempts.max(1),
            backoff: settings.backoff(),
            lock_duration: settings.lock_duration(),
            max_stalled_count: settings.max_stalled_count,
            keep_finished: settings.keep_finished(),
        }
    }
}

impl QueueOptions {
    /// Delay before the retry that follows attempt `attempts_made`.
    pub fn backoff_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1 << exponent)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// One named queue.
pub struct JobQueue {
    store: Arc<dyn KvStore>,
    kind: ResourceKind,
    options: QueueOptions,
}

impl JobQueue {
    pub fn new(store: Arc<dyn KvStore>, kind: ResourceKind, options: QueueOptions) -> Self {
        Self { store, kind, options }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    fn job_key(&self, id: &str) -> String {
        format!("queue:{}:job:{}", self.kind, id)
    }

    fn wait_key(&self) -> String {
        format!("queue:{}:wait", self.kind)
    }

    fn delayed_key(&self) -> String {
        format!("queue:{}:delayed", self.kind)
    }

    fn active_key(&self) -> String {
        format!("queue:{}:active", self.kind)
    }

    /// Load a job record by id.
    pub async fn get(&self, id: &str) -> Result<Option<JobRecord>> {
        match self.store.get(&self.job_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &JobRecord) -> Result<()> {
        let ttl = record.state.is_finished().then_some(self.options.keep_finished);
        let encoded = serde_json::to_string(record)?;
        self.store.set(&self.job_key(&record.id), &encoded, ttl).await
    }

    fn check_kind(&self, payload: &JobPayload) -> Result<()> {
        payload.validate()?;
        if payload.kind() != self.kind {
            return Err(TldwError::InvalidJob(format!(
                "{} payload submitted to the {} queue",
                payload.kind(),
                self.kind
            )));
        }
        Ok(())
    }

    /// Add a job unless one with the same id is waiting, delayed, active or
    /// completed. A failed record is replaced.
    #[instrument(skip(self, payload), fields(queue = %self.kind, job = %payload.job_id()))]
    pub async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueOutcome> {
        self.check_kind(&payload)?;
        let record = JobRecord::new(payload, self.options.attempts);
        let encoded = serde_json::to_string(&record)?;

        if self.store.set_nx(&self.job_key(&record.id), &encoded, None).await? {
            self.store.push_back(&self.wait_key(), &record.id).await?;
            info!("Job enqueued");
            return Ok(EnqueueOutcome::Added);
        }

        match self.get(&record.id).await? {
            Some(existing) if existing.state != JobState::Failed => {
                debug!(state = ?existing.state, "Job already known, not enqueued again");
                Ok(EnqueueOutcome::Duplicate(existing.state))
            }
            _ => {
                self.replace(&record).await?;
                info!("Failed job replaced and enqueued");
                Ok(EnqueueOutcome::Added)
            }
        }
    }

    /// Replace any existing record with a fresh waiting job.
    ///
    /// A worker still running the old record loses its lease, so its
    /// completion or failure is ignored.
    #[instrument(skip(self, payload), fields(queue = %self.kind, job = %payload.job_id()))]
    pub async fn requeue(&self, payload: JobPayload) -> Result<()> {
        self.check_kind(&payload)?;
        let record = JobRecord::new(payload, self.options.attempts);
        self.replace(&record).await?;
        info!("Job requeued");
        Ok(())
    }

    async fn replace(&self, record: &JobRecord) -> Result<()> {
        self.store.list_remove(&self.wait_key(), &record.id).await?;
        self.store.zrem(&self.delayed_key(), &record.id).await?;
        self.store.zrem(&self.active_key(), &record.id).await?;
        self.save(record).await?;
        self.store.push_back(&self.wait_key(), &record.id).await
    }

    /// Take the next waiting job and lease it to the caller.
    pub async fn reserve(&self) -> Result<Option<ActiveJob>> {
        while let Some(id) = self.store.pop_front(&self.wait_key()).await? {
            let Some(mut record) = self.get(&id).await? else {
                debug!(queue = %self.kind, job = %id, "Dropping wait entry without a record");
                continue;
            };
            if record.state != JobState::Waiting {
                debug!(queue = %self.kind, job = %id, state = ?record.state, "Skipping wait entry");
                continue;
            }

            let lease = Uuid::new_v4().to_string();
            record.state = JobState::Active;
            record.attempts_made += 1;
            record.lease = Some(lease.clone());
            record.updated_at = Utc::now();

            self.save(&record).await?;
            self.store
                .zadd(&self.active_key(), &id, now_ms() + duration_ms(self.options.lock_duration))
                .await?;
            return Ok(Some(ActiveJob { record, lease }));
        }
        Ok(None)
    }

    /// Load the record behind `job` if the caller still holds its lease.
    async fn leased(&self, job: &ActiveJob) -> Result<Option<JobRecord>> {
        let record = self.get(job.id()).await?;
        Ok(record.filter(|r| r.state == JobState::Active && r.lease.as_deref() == Some(job.lease.as_str())))
    }

    /// Extend the lease. Returns false if the lease was lost.
    pub async fn heartbeat(&self, job: &ActiveJob) -> Result<bool> {
        if self.leased(job).await?.is_none() {
            return Ok(false);
        }
        self.store
            .zadd(
                &self.active_key(),
                job.id(),
                now_ms() + duration_ms(self.options.lock_duration),
            )
            .await?;
        Ok(true)
    }

    /// Mark a leased job completed. Returns false if the lease was lost.
    pub async fn complete(&self, job: &ActiveJob) -> Result<bool> {
        let Some(mut record) = self.leased(job).await? else {
            warn!(queue = %self.kind, job = %job.id(), "Completion ignored, lease lost");
            return Ok(false);
        };
        let now = Utc::now();
        record.state = JobState::Completed;
        record.lease = None;
        record.last_error = None;
        record.updated_at = now;
        record.finished_at = Some(now);

        self.store.zrem(&self.active_key(), job.id()).await?;
        self.save(&record).await?;
        Ok(true)
    }

    /// Record a failed attempt; schedule a retry if attempts remain and the
    /// error is retryable.
    pub async fn fail(&self, job: &ActiveJob, error: &str, retryable: bool) -> Result<FailOutcome> {
        self.fail_at(job, error, retryable, now_ms()).await
    }

    pub async fn fail_at(
        &self,
        job: &ActiveJob,
        error: &str,
        retryable: bool,
        now_ms: i64,
    ) -> Result<FailOutcome> {
        let Some(mut record) = self.leased(job).await? else {
            warn!(queue = %self.kind, job = %job.id(), "Failure ignored, lease lost");
            return Ok(FailOutcome::Stale);
        };
        self.store.zrem(&self.active_key(), job.id()).await?;

        record.lease = None;
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();

        if retryable && record.attempts_made < record.max_attempts {
            let delay = self.options.backoff_for(record.attempts_made);
            record.state = JobState::Delayed;
            self.save(&record).await?;
            self.store
                .zadd(&self.delayed_key(), job.id(), now_ms + duration_ms(delay))
                .await?;
            return Ok(FailOutcome::Retrying { delay });
        }

        record.state = JobState::Failed;
        record.finished_at = Some(Utc::now());
        self.save(&record).await?;
        Ok(FailOutcome::Failed)
    }

    /// Move delayed jobs whose backoff has elapsed back to waiting.
    pub async fn promote_delayed(&self) -> Result<usize> {
        self.promote_delayed_at(now_ms()).await
    }

    pub async fn promote_delayed_at(&self, now_ms: i64) -> Result<usize> {
        let due = self
            .store
            .zrange_by_score(&self.delayed_key(), now_ms, SWEEP_BATCH)
            .await?;

        let mut promoted = 0;
        for id in due {
            // Another process may have promoted it first.
            if !self.store.zrem(&self.delayed_key(), &id).await? {
                continue;
            }
            let Some(mut record) = self.get(&id).await? else {
                continue;
            };
            record.state = JobState::Waiting;
            record.updated_at = Utc::now();
            self.save(&record).await?;
            self.store.push_back(&self.wait_key(), &id).await?;
            promoted += 1;
        }
        if promoted > 0 {
            debug!(queue = %self.kind, promoted, "Promoted delayed jobs");
        }
        Ok(promoted)
    }

    /// Requeue active jobs whose lease expired, or fail them once they have
    /// stalled more than the allowed number of times.
    pub async fn reclaim_stalled_at(&self, now_ms: i64) -> Result<Reclaimed> {
        let expired = self
            .store
            .zrange_by_score(&self.active_key(), now_ms, SWEEP_BATCH)
            .await?;

        let mut reclaimed = Reclaimed::default();
        for id in expired {
            if !self.store.zrem(&self.active_key(), &id).await? {
                continue;
            }
            let Some(mut record) = self.get(&id).await? else {
                continue;
            };
            if record.state != JobState::Active {
                continue;
            }

            record.stalled_count += 1;
            record.lease = None;
            record.updated_at = Utc::now();

            if record.stalled_count > self.options.max_stalled_count {
                warn!(queue = %self.kind, job = %id, "Job stalled too often, failing it");
                record.state = JobState::Failed;
                record.last_error = Some(STALLED_ERROR.to_string());
                record.finished_at = Some(Utc::now());
                self.save(&record).await?;
                reclaimed.failed.push(record);
            } else {
                warn!(queue = %self.kind, job = %id, "Job stalled, moving back to waiting");
                record.state = JobState::Waiting;
                self.save(&record).await?;
                self.store.push_back(&self.wait_key(), &id).await?;
                reclaimed.requeued.push(id);
            }
        }
        Ok(reclaimed)
    }

    /// Remove a job record and every index entry for it.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.list_remove(&self.wait_key(), id).await?;
        self.store.zrem(&self.delayed_key(), id).await?;
        self.store.zrem(&self.active_key(), id).await?;
        self.store.delete(&self.job_key(id)).await
    }

    pub async fn counts(&self) -> Result<QueueCounts> {
        Ok(QueueCounts {
            waiting: self.store.list_len(&self.wait_key()).await?,
            delayed: self.store.zcard(&self.delayed_key()).await?,
            active: self.store.zcard(&self.active_key()).await?,
        })
    }
}

/// The three queues the pipeline uses.
#[derive(Clone)]
pub struct Queues {
    pub transcript: Arc<JobQueue>,
    pub summary: Arc<JobQueue>,
    pub translation: Arc<JobQueue>,
}

impl Queues {
    pub fn new(store: Arc<dyn KvStore>, settings: &QueueSettings) -> Self {
        let options = QueueOptions::from(settings);
        let queue = |kind| Arc::new(JobQueue::new(store.clone(), kind, options.clone()));
        Self {
            transcript: queue(ResourceKind::Transcript),
            summary: queue(ResourceKind::Summary),
            translation: queue(ResourceKind::Translation),
        }
    }

    pub fn for_kind(&self, kind: ResourceKind) -> &Arc<JobQueue> {
        match kind {
            ResourceKind::Transcript => &self.transcript,
            ResourceKind::Summary => &self.summary,
            ResourceKind::Translation => &self.translation,
        }
    }

    /// Enqueue on the queue matching the payload's kind.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueOutcome> {
        self.for_kind(payload.kind()).enqueue(payload).await
    }

    pub async fn requeue(&self, payload: JobPayload) -> Result<()> {
        self.for_kind(payload.kind()).requeue(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn queue(kind: ResourceKind) -> JobQueue {
        JobQueue::new(
            Arc::new(MemoryStore::new()),
            kind,
            QueueOptions::from(&QueueSettings::default()),
        )
    }

    #[test]
    fn test_payload_validation() {
        assert!(JobPayload::transcript("abc", "en").validate().is_ok());
        assert!(JobPayload::transcript("", "en").validate().is_err());
        assert!(JobPayload::transcript("abc", "English").validate().is_err());

        let same = JobPayload::Translation(TranslationJob {
            video_id: "abc".into(),
            source_language: "en".into(),
            target_language: "en".into(),
            resource: ResourceKind::Transcript,
        });
        assert!(same.validate().is_err());
    }

    #[test]
    fn test_payload_is_tagged() {
        let payload = JobPayload::transcript("abc", "en");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "transcript");
        assert_eq!(payload.job_id(), "transcript:abc:en");
    }

    #[test]
    fn test_backoff_doubles() {
        let options = QueueOptions::from(&QueueSettings::default());
        assert_eq!(options.backoff_for(1), Duration::from_secs(2));
        assert_eq!(options.backoff_for(2), Duration::from_secs(4));
        assert_eq!(options.backoff_for(3), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let queue = queue(ResourceKind::Transcript);

        let first = queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        let second = queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();

        assert_eq!(first, EnqueueOutcome::Added);
        assert_eq!(second, EnqueueOutcome::Duplicate(JobState::Waiting));
        assert_eq!(queue.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_adds_one_job() {
        let queue = queue(ResourceKind::Transcript);
        let outcomes = futures::future::join_all(
            (0..8).map(|_| queue.enqueue(JobPayload::transcript("abc", "en"))),
        )
        .await;

        let added = outcomes
            .into_iter()
            .filter(|o| matches!(o, Ok(EnqueueOutcome::Added)))
            .count();
        assert_eq!(added, 1);
        assert_eq!(queue.counts().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_wrong_queue_rejected() {
        let queue = queue(ResourceKind::Summary);
        let result = queue.enqueue(JobPayload::transcript("abc", "en")).await;
        assert!(matches!(result, Err(TldwError::InvalidJob(_))));
    }

    #[tokio::test]
    async fn test_completed_job_is_not_reenqueued() {
        let queue = queue(ResourceKind::Transcript);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        assert!(queue.complete(&job).await.unwrap());

        let outcome = queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Duplicate(JobState::Completed));
        assert_eq!(queue.counts().await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn test_retry_with_backoff_then_fail() {
        let queue = queue(ResourceKind::Transcript);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        let t0 = 1_000_000;

        let job = queue.reserve().await.unwrap().unwrap();
        let outcome = queue.fail_at(&job, "boom", true, t0).await.unwrap();
        assert_eq!(outcome, FailOutcome::Retrying { delay: Duration::from_secs(2) });
        assert_eq!(queue.counts().await.unwrap().delayed, 1);

        // Not due yet.
        assert_eq!(queue.promote_delayed_at(t0 + 1_999).await.unwrap(), 0);
        assert_eq!(queue.promote_delayed_at(t0 + 2_000).await.unwrap(), 1);

        let job = queue.reserve().await.unwrap().unwrap();
        let outcome = queue.fail_at(&job, "boom", true, t0).await.unwrap();
        assert_eq!(outcome, FailOutcome::Retrying { delay: Duration::from_secs(4) });
        queue.promote_delayed_at(t0 + 4_000).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(job.record.attempts_made, 3);
        assert_eq!(queue.fail_at(&job, "boom", true, t0).await.unwrap(), FailOutcome::Failed);

        let record = queue.get("transcript:abc:en").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let queue = queue(ResourceKind::Transcript);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(queue.fail(&job, "bad input", false).await.unwrap(), FailOutcome::Failed);
    }

    #[tokio::test]
    async fn test_failed_job_is_replaced_on_enqueue() {
        let queue = queue(ResourceKind::Transcript);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        let job = queue.reserve().await.unwrap().unwrap();
        queue.fail(&job, "bad input", false).await.unwrap();

        let outcome = queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        assert_eq!(outcome, EnqueueOutcome::Added);

        let job = queue.reserve().await.unwrap().unwrap();
        assert_eq!(job.record.attempts_made, 1);
        assert_eq!(job.record.last_error, None);
    }

    #[tokio::test]
    async fn test_stalled_job_is_requeued_once_then_failed() {
        let queue = queue(ResourceKind::Summary);
        queue
            .enqueue(JobPayload::summary("abc", "en", Uuid::new_v4()))
            .await
            .unwrap();
        let far_future = now_ms() + 60_000;

        queue.reserve().await.unwrap().unwrap();
        let reclaimed = queue.reclaim_stalled_at(far_future).await.unwrap();
        assert_eq!(reclaimed.requeued, vec!["summary:abc:en".to_string()]);
        assert!(reclaimed.failed.is_empty());
        assert_eq!(queue.counts().await.unwrap().waiting, 1);

        queue.reserve().await.unwrap().unwrap();
        let reclaimed = queue.reclaim_stalled_at(far_future).await.unwrap();
        assert!(reclaimed.requeued.is_empty());
        assert_eq!(reclaimed.failed.len(), 1);
        assert_eq!(reclaimed.failed[0].id, "summary:abc:en");

        let record = queue.get("summary:abc:en").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(record.last_error.as_deref(), Some(STALLED_ERROR));
        assert_eq!(queue.counts().await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn test_requeue_invalidates_old_lease() {
        let queue = queue(ResourceKind::Transcript);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        let stale = queue.reserve().await.unwrap().unwrap();

        queue.requeue(JobPayload::transcript("abc", "en")).await.unwrap();
        assert!(!queue.heartbeat(&stale).await.unwrap());
        assert!(!queue.complete(&stale).await.unwrap());

        let fresh = queue.reserve().await.unwrap().unwrap();
        assert!(queue.complete(&fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_job_from_stalling() {
        let queue = queue(ResourceKind::Transcript);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        let job = queue.reserve().await.unwrap().unwrap();

        assert!(queue.heartbeat(&job).await.unwrap());
        let reclaimed = queue.reclaim_stalled_at(now_ms()).await.unwrap();
        assert!(reclaimed.is_empty());
        assert_eq!(queue.counts().await.unwrap().active, 1);
    }
}
