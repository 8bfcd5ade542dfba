//! Worker command: run the queue pools and the credential sweeper.

use crate::cli::Output;
use crate::config::Settings;
use crate::generation::CredentialGateway;
use crate::orchestrator::Orchestrator;
use crate::resources::ResourceKind;
use crate::store::{self, KvStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background tasks of a process: worker slots, queue maintenance and the
/// credential sweeper.
pub(crate) struct Background {
    tasks: JoinSet<()>,
    shutdown: CancellationToken,
}

impl Background {
    pub(crate) fn start(orchestrator: &Orchestrator, kv: Arc<dyn KvStore>, settings: &Settings) -> Self {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for pool in orchestrator.worker_pools(&settings.queue) {
            pool.spawn(&mut tasks, shutdown.clone());
        }

        let gateway = CredentialGateway::new(kv, &settings.generation);
        let interval = settings.generation.sweep_interval().max(Duration::from_secs(1));
        let token = shutdown.clone();
        tasks.spawn(async move {
            run_sweeper(gateway, interval, token).await;
        });

        Self { tasks, shutdown }
    }

    /// Signal every task to stop and wait for in-flight jobs to finish.
    pub(crate) async fn stop(mut self) {
        self.shutdown.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Background tasks stopped");
    }
}

/// Periodically reactivate credentials whose cooldown has passed.
async fn run_sweeper(gateway: CredentialGateway, interval: Duration, shutdown: CancellationToken) {
    if gateway.credentials().is_empty() {
        debug!("No credentials configured, sweeper idle");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = gateway.sweep().await {
                    warn!("Credential sweep failed: {}", e);
                }
            }
        }
    }
}

/// Log the size of each queue.
pub(crate) async fn log_queue_counts(orchestrator: &Orchestrator) {
    for kind in [ResourceKind::Transcript, ResourceKind::Summary, ResourceKind::Translation] {
        match orchestrator.queues().for_kind(kind).counts().await {
            Ok(counts) => info!(
                queue = %kind,
                waiting = counts.waiting,
                delayed = counts.delayed,
                active = counts.active,
                "Queue state"
            ),
            Err(e) => warn!(queue = %kind, "Failed to read queue counts: {}", e),
        }
    }
}

/// Run the worker pools until Ctrl+C.
pub async fn run_worker(settings: Settings) -> anyhow::Result<()> {
    let kv = store::connect(&settings).await?;
    let orchestrator = Orchestrator::with_store(&settings, kv.clone())?;

    log_queue_counts(&orchestrator).await;
    let background = Background::start(&orchestrator, kv, &settings);

    Output::header("tldw worker");
    Output::kv("Transcript slots", &settings.queue.transcript_concurrency.to_string());
    Output::kv("Summary slots", &settings.queue.summary_concurrency.to_string());
    Output::kv("Translation slots", &settings.queue.translation_concurrency.to_string());
    println!();
    Output::info("Press Ctrl+C to stop the worker.");

    tokio::signal::ctrl_c().await?;
    Output::info("Shutting down, waiting for running jobs...");
    background.stop().await;

    Ok(())
}
