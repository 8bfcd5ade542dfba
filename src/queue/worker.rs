//! Worker pools: N concurrent slots per queue plus a maintenance task.

use super::{now_ms, ActiveJob, FailOutcome, JobQueue, JobRecord, STALLED_ERROR};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Domain action for one job kind.
///
/// The handler owns the resource lifecycle: it marks the resource
/// `processing` on entry, `completed` on success and `failed` (with the error
/// string) before returning an error. The queue owns retries.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> Result<()>;

    /// Called once a job has failed for good.
    async fn on_exhausted(&self, _job: &JobRecord, _error: &str) {}
}

/// Runs a queue's jobs through a handler.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    stalled_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
        poll_interval: Duration,
        stalled_interval: Duration,
    ) -> Self {
        Self {
            queue,
            handler,
            concurrency,
            poll_interval,
            stalled_interval,
        }
    }

    /// Spawn the slots and the maintenance task onto `tasks`.
    ///
    /// A pool with zero concurrency spawns nothing; its queue still accepts
    /// jobs, which wait until a process with slots picks them up.
    pub fn spawn(self, tasks: &mut JoinSet<()>, shutdown: CancellationToken) {
        let kind = self.queue.kind();
        if self.concurrency == 0 {
            info!(queue = %kind, "Queue disabled (concurrency 0)");
            return;
        }
        info!(queue = %kind, concurrency = self.concurrency, "Starting worker pool");

        for slot in 0..self.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let shutdown = shutdown.clone();
            let poll = self.poll_interval;
            tasks.spawn(async move {
                run_slot(slot, queue, handler, poll, shutdown).await;
            });
        }

        let queue = self.queue.clone();
        let handler = self.handler.clone();
        let poll = self.poll_interval;
        let stalled = self.stalled_interval;
        tasks.spawn(async move {
            run_maintenance(queue, handler, poll, stalled, shutdown).await;
        });
    }
}

async fn run_slot(
    slot: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll: Duration,
    shutdown: CancellationToken,
) {
    debug!(queue = %queue.kind(), slot, "Worker slot started");
    while !shutdown.is_cancelled() {
        match queue.reserve().await {
            Ok(Some(job)) => process(&queue, handler.as_ref(), job).await,
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            Err(e) => {
                warn!(queue = %queue.kind(), "Failed to reserve job: {}", e);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }
    }
    debug!(queue = %queue.kind(), slot, "Worker slot stopped");
}

/// Run one job, renewing its lease until the handler returns.
#[instrument(skip_all, fields(queue = %queue.kind(), job = %job.id(), attempt = job.record.attempts_made))]
pub(crate) async fn process(queue: &JobQueue, handler: &dyn JobHandler, job: ActiveJob) {
    info!("Processing job");

    let renew_every = (queue.options().lock_duration / 2).max(Duration::from_millis(100));
    let mut heartbeat = tokio::time::interval(renew_every);
    heartbeat.tick().await;

    let work = handler.handle(&job.record);
    tokio::pin!(work);

    let result = loop {
        tokio::select! {
            result = &mut work => break result,
            _ = heartbeat.tick() => {
                match queue.heartbeat(&job).await {
                    Ok(true) => {}
                    Ok(false) => warn!("Lease lost while job was running"),
                    Err(e) => warn!("Lease renewal failed: {}", e),
                }
            }
        }
    };

    match result {
        Ok(()) => match queue.complete(&job).await {
            Ok(_) => info!("Job completed"),
            Err(e) => error!("Failed to mark job completed: {}", e),
        },
        Err(e) => {
            let message = e.to_string();
            match queue.fail(&job, &message, e.is_retryable()).await {
                Ok(FailOutcome::Retrying { delay }) => {
                    warn!(retry_in = ?delay, "Job failed, will retry: {}", message);
                }
                Ok(FailOutcome::Failed) => {
                    error!("Job failed permanently: {}", message);
                    handler.on_exhausted(&job.record, &message).await;
                }
                Ok(FailOutcome::Stale) => {}
                Err(queue_err) => error!("Failed to record job failure: {}", queue_err),
            }
        }
    }
}

async fn run_maintenance(
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll: Duration,
    stalled: Duration,
    shutdown: CancellationToken,
) {
    let mut promote = tokio::time::interval(poll);
    let mut sweep = tokio::time::interval(stalled);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = promote.tick() => {
                if let Err(e) = queue.promote_delayed().await {
                    warn!(queue = %queue.kind(), "Failed to promote delayed jobs: {}", e);
                }
            }
            _ = sweep.tick() => {
                if let Err(e) = reclaim_stalled(&queue, handler.as_ref(), now_ms()).await {
                    warn!(queue = %queue.kind(), "Stalled job sweep failed: {}", e);
                }
            }
        }
    }
}

/// Sweep stalled jobs and run the exhaustion path for those failed for good.
pub(crate) async fn reclaim_stalled(queue: &JobQueue, handler: &dyn JobHandler, now_ms: i64) -> Result<()> {
    let reclaimed = queue.reclaim_stalled_at(now_ms).await?;
    if !reclaimed.is_empty() {
        warn!(queue = %queue.kind(), count = reclaimed.len(), "Recovered stalled jobs");
    }
    for record in &reclaimed.failed {
        error!(queue = %queue.kind(), job = %record.id, "Job failed permanently: {}", STALLED_ERROR);
        handler.on_exhausted(record, STALLED_ERROR).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::error::TldwError;
    use crate::queue::{JobPayload, JobState, QueueOptions};
    use crate::resources::ResourceKind;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail_with: Option<fn() -> TldwError>,
        exhausted: AtomicUsize,
    }

    impl CountingHandler {
        fn new(fail_with: Option<fn() -> TldwError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_with,
                exhausted: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: &JobRecord) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        async fn on_exhausted(&self, _job: &JobRecord, _error: &str) {
            self.exhausted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue() -> JobQueue {
        JobQueue::new(
            Arc::new(MemoryStore::new()),
            ResourceKind::Transcript,
            QueueOptions::from(&QueueSettings::default()),
        )
    }

    #[tokio::test]
    async fn test_process_completes_job() {
        let queue = queue();
        let handler = CountingHandler::new(None);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        process(&queue, &handler, job).await;

        let record = queue.get("transcript:abc:en").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_process_schedules_retry_for_transient_error() {
        let queue = queue();
        let handler = CountingHandler::new(Some(|| TldwError::CaptionSource("timeout".into())));
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        process(&queue, &handler, job).await;

        let record = queue.get("transcript:abc:en").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Delayed);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_process_fails_invalid_job_without_retry() {
        let queue = queue();
        let handler = CountingHandler::new(Some(|| TldwError::InvalidJob("nope".into())));
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();

        let job = queue.reserve().await.unwrap().unwrap();
        process(&queue, &handler, job).await;

        let record = queue.get("transcript:abc:en").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stall_sweep_runs_exhaustion_path() {
        let queue = queue();
        let handler = CountingHandler::new(None);
        queue.enqueue(JobPayload::transcript("abc", "en")).await.unwrap();
        let far_future = now_ms() + 3_600_000;

        queue.reserve().await.unwrap().unwrap();
        reclaim_stalled(&queue, &handler, far_future).await.unwrap();
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 0);

        queue.reserve().await.unwrap().unwrap();
        reclaim_stalled(&queue, &handler, far_future).await.unwrap();
        assert_eq!(handler.exhausted.load(Ordering::SeqCst), 1);

        let record = queue.get("transcript:abc:en").await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops_on_shutdown() {
        let queue = Arc::new(queue());
        for video in ["a", "b", "c"] {
            queue.enqueue(JobPayload::transcript(video, "en")).await.unwrap();
        }
        let handler = Arc::new(CountingHandler::new(None));

        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        WorkerPool::new(
            queue.clone(),
            handler.clone(),
            2,
            Duration::from_millis(10),
            Duration::from_secs(30),
        )
        .spawn(&mut tasks, shutdown.clone());

        for _ in 0..200 {
            if handler.calls.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        while tasks.join_next().await.is_some() {}

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.counts().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_spawns_nothing() {
        let queue = Arc::new(queue());
        let mut tasks = JoinSet::new();
        WorkerPool::new(
            queue,
            Arc::new(CountingHandler::new(None)),
            0,
            Duration::from_millis(10),
            Duration::from_secs(30),
        )
        .spawn(&mut tasks, CancellationToken::new());
        assert!(tasks.is_empty());
    }
}
