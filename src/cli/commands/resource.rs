//! Resource commands: request, status, restart and delete.

use super::{language_or_default, parse_kind};
use crate::captions::parse_video_id;
use crate::cli::Output;
use crate::config::Settings;
use crate::error::TldwError;
use crate::orchestrator::Orchestrator;
use crate::resources::{QueryStatus, ResourceKind, StatusView};
use anyhow::Result;

/// Create a transcript or summary, optionally waiting for it to finish.
///
/// Waiting only makes progress when a worker process (`tldw worker` or
/// `tldw serve`) shares the same store.
pub async fn run_request(
    kind: &str,
    video: &str,
    language: Option<&str>,
    wait: bool,
    settings: Settings,
) -> Result<()> {
    let kind = parse_kind(kind)?;
    let video_id = parse_video_id(video)?;
    let language = language_or_default(language, &settings);
    let orchestrator = Orchestrator::connect(&settings).await?;

    if !wait {
        let view = orchestrator.request(kind, &video_id, &language).await?;
        Output::status_view(&view);
        if !view.status.is_terminal() {
            Output::info(&format!(
                "Check progress with: tldw status {} {} -l {}",
                kind, video_id, language
            ));
        }
        return Ok(());
    }

    let spinner = Output::spinner(&format!("Waiting for {} of {} ({})...", kind, video_id, language));
    let result = match kind {
        ResourceKind::Summary => orchestrator.create_summary_and_wait(&video_id, &language).await,
        _ => {
            let timeout = orchestrator.wait_timeout();
            match orchestrator.request(kind, &video_id, &language).await {
                Ok(view) if view.status.is_terminal() => Ok(view),
                Ok(_) => orchestrator.wait_for(kind, &video_id, &language, timeout).await,
                Err(e) => Err(e),
            }
        }
    };
    spinner.finish_and_clear();

    match result {
        Ok(view) => {
            Output::status_view(&view);
            finish(&view)
        }
        Err(TldwError::Timeout(after)) => {
            Output::warning(&format!(
                "Still not finished after {}s; the job keeps running.",
                after.as_secs()
            ));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Show the current state of a resource.
pub async fn run_status(kind: &str, video: &str, language: Option<&str>, settings: Settings) -> Result<()> {
    let kind = parse_kind(kind)?;
    let video_id = parse_video_id(video)?;
    let language = language_or_default(language, &settings);
    let orchestrator = Orchestrator::connect(&settings).await?;

    let view = orchestrator.status(kind, &video_id, &language).await?;
    Output::status_view(&view);
    Ok(())
}

/// Reset a failed or stale resource and requeue its job.
pub async fn run_restart(kind: &str, video: &str, language: Option<&str>, settings: Settings) -> Result<()> {
    let kind = parse_kind(kind)?;
    let video_id = parse_video_id(video)?;
    let language = language_or_default(language, &settings);
    let orchestrator = Orchestrator::connect(&settings).await?;

    let view = orchestrator.restart(kind, &video_id, &language).await?;
    match view.status {
        QueryStatus::Pending => Output::success(&format!("Restarted {} of {}", kind, video_id)),
        QueryStatus::NotFound => Output::warning("Nothing to restart."),
        _ => Output::info("Resource is not failed or stale; left as is."),
    }
    Output::status_view(&view);
    Ok(())
}

/// Delete the transcript and summary of a video in one language.
pub async fn run_delete(video: &str, language: Option<&str>, settings: Settings) -> Result<()> {
    let video_id = parse_video_id(video)?;
    let language = language_or_default(language, &settings);
    let orchestrator = Orchestrator::connect(&settings).await?;

    let report = orchestrator.delete(&video_id, &language).await?;
    if !report.transcript && !report.summary && report.jobs == 0 {
        Output::warning(&format!("Nothing stored for {} ({})", video_id, language));
        return Ok(());
    }

    Output::success(&format!("Deleted {} ({})", video_id, language));
    Output::kv("Transcript", yes_no(report.transcript));
    Output::kv("Summary", yes_no(report.summary));
    Output::kv("Jobs removed", &report.jobs.to_string());
    Ok(())
}

fn finish(view: &StatusView) -> Result<()> {
    if view.status == QueryStatus::Failed {
        anyhow::bail!("{} failed", view.kind);
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
