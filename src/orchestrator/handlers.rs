//! Job handlers: the domain action behind each queue.

use super::{insert_summary_or_reread, insert_transcript_or_reread, Orchestrator};
use crate::error::{Result, TldwError};
use crate::queue::{JobHandler, JobPayload, JobRecord, SummaryJob, TranscriptJob, TranslationJob};
use crate::resources::{ResourceKind, ResourceStatus, Summary, Transcript, TranscriptOrigin};
use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

fn wrong_payload(expected: ResourceKind, job: &JobRecord) -> TldwError {
    TldwError::InvalidJob(format!(
        "{} handler received a {} job ({})",
        expected,
        job.payload.kind(),
        job.id
    ))
}

/// Mark a transcript still in flight as failed once its job is dead.
async fn fail_abandoned_transcript(pipeline: &Orchestrator, video_id: &str, language: &str, error: &str) {
    let mut transcript = match pipeline.resources.find_transcript(video_id, language).await {
        Ok(Some(t)) if !t.status.is_terminal() => t,
        Ok(_) => return,
        Err(e) => {
            error!("Failed to load abandoned transcript: {}", e);
            return;
        }
    };
    if let Err(e) = transcript.transition(ResourceStatus::Failed) {
        error!("Failed to fail abandoned transcript: {}", e);
        return;
    }
    transcript.error = Some(error.to_string());
    if let Err(e) = pipeline.resources.update_transcript(&transcript).await {
        error!("Failed to record transcript failure: {}", e);
        return;
    }
    pipeline.cache.refresh_transcript(&transcript).await;
    warn!(video = video_id, language, "Transcript failed: {}", error);
}

async fn fail_abandoned_summary(pipeline: &Orchestrator, video_id: &str, language: &str, error: &str) {
    let mut summary = match pipeline.resources.find_summary(video_id, language).await {
        Ok(Some(s)) if !s.status.is_terminal() => s,
        Ok(_) => return,
        Err(e) => {
            error!("Failed to load abandoned summary: {}", e);
            return;
        }
    };
    if let Err(e) = summary.transition(ResourceStatus::Failed) {
        error!("Failed to fail abandoned summary: {}", e);
        return;
    }
    summary.error = Some(error.to_string());
    if let Err(e) = pipeline.resources.update_summary(&summary).await {
        error!("Failed to record summary failure: {}", e);
        return;
    }
    pipeline.cache.refresh_summary(&summary).await;
    warn!(video = video_id, language, "Summary failed: {}", error);
}

/// Fetches captions (or translates an alternate language) for a transcript job.
pub struct TranscriptHandler {
    pipeline: Orchestrator,
}

impl TranscriptHandler {
    pub fn new(pipeline: Orchestrator) -> Self {
        Self { pipeline }
    }

    /// Produce transcript text and its origin for (video, language).
    async fn produce(&self, video_id: &str, language: &str) -> Result<(String, TranscriptOrigin)> {
        let p = &self.pipeline;

        if let Some(track) = p.captions.fetch_captions(video_id, language).await? {
            return Ok((track.text, track.kind.into()));
        }
        info!("No native captions, trying fallback languages");

        let source = match p
            .fallback
            .find_completed(&p.cache, p.resources.as_ref(), video_id, language)
            .await?
        {
            Some(source) => Some(source),
            None => {
                p.fallback
                    .fetch_alternate(p.captions.as_ref(), &p.cache, p.resources.as_ref(), video_id, language)
                    .await?
            }
        };

        let Some(source) = source else {
            return Err(TldwError::NoCaptions(format!(
                "video {} has no captions in {} or any fallback language",
                video_id, language
            )));
        };

        let text = p.translator.translate(&source.text, &source.language, language).await?;
        Ok((text, TranscriptOrigin::Translated(source.language)))
    }
}

#[async_trait]
impl JobHandler for TranscriptHandler {
    #[instrument(skip_all, fields(job = %job.id))]
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        let JobPayload::Transcript(TranscriptJob { video_id, language }) = &job.payload else {
            return Err(wrong_payload(ResourceKind::Transcript, job));
        };
        let p = &self.pipeline;

        let mut transcript = match p.resources.find_transcript(video_id, language).await? {
            Some(t) => t,
            None => insert_transcript_or_reread(p.resources.as_ref(), Transcript::pending(video_id, language)).await?,
        };
        if transcript.is_completed() {
            info!("Transcript already completed");
            p.enqueue_summary(&transcript).await;
            return Ok(());
        }

        transcript.transition(ResourceStatus::Processing)?;
        p.resources.update_transcript(&transcript).await?;
        p.cache.refresh_transcript(&transcript).await;

        match self.produce(video_id, language).await {
            Ok((text, origin)) => {
                transcript.text = text;
                transcript.origin = origin;
                transcript.transition(ResourceStatus::Completed)?;
                p.resources.update_transcript(&transcript).await?;
                p.cache.refresh_transcript(&transcript).await;
                info!(chars = transcript.text.len(), origin = %transcript.origin.encode(), "Transcript completed");

                p.enqueue_summary(&transcript).await;
                Ok(())
            }
            Err(e) => {
                transcript.transition(ResourceStatus::Failed)?;
                transcript.error = Some(e.to_string());
                if let Err(store_err) = p.resources.update_transcript(&transcript).await {
                    error!("Failed to record transcript failure: {}", store_err);
                }
                p.cache.refresh_transcript(&transcript).await;
                Err(e)
            }
        }
    }

    async fn on_exhausted(&self, job: &JobRecord, error: &str) {
        if let JobPayload::Transcript(TranscriptJob { video_id, language }) = &job.payload {
            fail_abandoned_transcript(&self.pipeline, video_id, language, error).await;
        }
    }
}

/// Summarizes a completed transcript, or translates an existing summary.
pub struct SummaryHandler {
    pipeline: Orchestrator,
}

impl SummaryHandler {
    pub fn new(pipeline: Orchestrator) -> Self {
        Self { pipeline }
    }

    /// The completed transcript a summary job refers to.
    async fn source_transcript(&self, job: &SummaryJob) -> Result<Transcript> {
        let p = &self.pipeline;
        let by_id = p.resources.transcript_by_id(job.transcript_id).await?;
        let transcript = match by_id {
            Some(t) if t.is_completed() => Some(t),
            _ => p
                .resources
                .find_transcript(&job.video_id, &job.language)
                .await?
                .filter(Transcript::is_completed),
        };
        transcript.ok_or_else(|| {
            TldwError::Summarization(format!(
                "no completed {} transcript for video {}",
                job.language, job.video_id
            ))
        })
    }

    /// Translate a completed summary when the transcript itself was
    /// translated; otherwise summarize the transcript.
    async fn produce(&self, transcript: &Transcript) -> Result<String> {
        let p = &self.pipeline;

        if let Some(source_lang) = transcript.origin.translated_from() {
            let source = p
                .resources
                .find_summary(&transcript.video_id, source_lang)
                .await?
                .filter(Summary::is_completed)
                .and_then(|s| s.content);
            if let Some(content) = source {
                match p.translator.translate(&content, source_lang, &transcript.language).await {
                    Ok(translated) => {
                        info!(from = source_lang, "Translated existing summary");
                        return Ok(translated);
                    }
                    Err(e) => warn!(from = source_lang, "Summary translation failed, summarizing instead: {}", e),
                }
            }
        }

        p.summarizer.summarize(&transcript.text, &transcript.language).await
    }
}

#[async_trait]
impl JobHandler for SummaryHandler {
    #[instrument(skip_all, fields(job = %job.id))]
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        let JobPayload::Summary(payload) = &job.payload else {
            return Err(wrong_payload(ResourceKind::Summary, job));
        };
        let p = &self.pipeline;

        let mut summary = match p.resources.find_summary(&payload.video_id, &payload.language).await? {
            Some(s) => s,
            None => {
                let pending = Summary::pending(&payload.video_id, &payload.language, None);
                insert_summary_or_reread(p.resources.as_ref(), pending).await?
            }
        };
        if summary.is_completed() {
            info!("Summary already completed");
            return Ok(());
        }

        let transcript = match self.source_transcript(payload).await {
            Ok(t) => t,
            Err(e) => {
                if summary.status != ResourceStatus::Failed {
                    summary.transition(ResourceStatus::Failed)?;
                }
                summary.error = Some(e.to_string());
                if let Err(store_err) = p.resources.update_summary(&summary).await {
                    error!("Failed to record summary failure: {}", store_err);
                }
                p.cache.refresh_summary(&summary).await;
                return Err(e);
            }
        };

        summary.transcript_id = Some(transcript.id);
        summary.transition(ResourceStatus::Processing)?;
        p.resources.update_summary(&summary).await?;
        p.cache.refresh_summary(&summary).await;

        match self.produce(&transcript).await {
            Ok(content) => {
                summary.content = Some(content);
                summary.transition(ResourceStatus::Completed)?;
                p.resources.update_summary(&summary).await?;
                p.cache.refresh_summary(&summary).await;
                info!("Summary completed");
                Ok(())
            }
            Err(e) => {
                summary.transition(ResourceStatus::Failed)?;
                summary.error = Some(e.to_string());
                if let Err(store_err) = p.resources.update_summary(&summary).await {
                    error!("Failed to record summary failure: {}", store_err);
                }
                p.cache.refresh_summary(&summary).await;
                Err(e)
            }
        }
    }

    async fn on_exhausted(&self, job: &JobRecord, error: &str) {
        if let JobPayload::Summary(payload) = &job.payload {
            fail_abandoned_summary(&self.pipeline, &payload.video_id, &payload.language, error).await;
        }
    }
}

/// Translates a completed transcript or summary into another language.
///
/// Its queue runs with zero slots unless configured; requests translate
/// inline instead.
pub struct TranslationHandler {
    pipeline: Orchestrator,
}

impl TranslationHandler {
    pub fn new(pipeline: Orchestrator) -> Self {
        Self { pipeline }
    }

    async fn translate_transcript(&self, job: &TranslationJob) -> Result<()> {
        let p = &self.pipeline;
        let source = p
            .resources
            .find_transcript(&job.video_id, &job.source_language)
            .await?
            .filter(Transcript::is_completed)
            .ok_or_else(|| missing_source(job))?;

        let mut target = match p.resources.find_transcript(&job.video_id, &job.target_language).await? {
            Some(t) if t.is_completed() => return Ok(()),
            Some(t) => t,
            None => {
                let pending = Transcript::pending(&job.video_id, &job.target_language);
                insert_transcript_or_reread(p.resources.as_ref(), pending).await?
            }
        };
        target.transition(ResourceStatus::Processing)?;
        p.resources.update_transcript(&target).await?;

        match p.translator.translate(&source.text, &source.language, &job.target_language).await {
            Ok(text) => {
                target.text = text;
                target.origin = TranscriptOrigin::Translated(source.language.clone());
                target.transition(ResourceStatus::Completed)?;
                p.resources.update_transcript(&target).await?;
                p.cache.refresh_transcript(&target).await;
                p.enqueue_summary(&target).await;
                Ok(())
            }
            Err(e) => {
                target.transition(ResourceStatus::Failed)?;
                target.error = Some(e.to_string());
                if let Err(store_err) = p.resources.update_transcript(&target).await {
                    error!("Failed to record translation failure: {}", store_err);
                }
                p.cache.refresh_transcript(&target).await;
                Err(e)
            }
        }
    }

    async fn translate_summary(&self, job: &TranslationJob) -> Result<()> {
        let p = &self.pipeline;
        let content = p
            .resources
            .find_summary(&job.video_id, &job.source_language)
            .await?
            .filter(Summary::is_completed)
            .and_then(|s| s.content)
            .ok_or_else(|| missing_source(job))?;

        let transcript_id = p
            .resources
            .find_transcript(&job.video_id, &job.target_language)
            .await?
            .map(|t| t.id);
        let mut target = match p.resources.find_summary(&job.video_id, &job.target_language).await? {
            Some(s) if s.is_completed() => return Ok(()),
            Some(s) => s,
            None => {
                let pending = Summary::pending(&job.video_id, &job.target_language, transcript_id);
                insert_summary_or_reread(p.resources.as_ref(), pending).await?
            }
        };
        target.transition(ResourceStatus::Processing)?;
        p.resources.update_summary(&target).await?;

        match p.translator.translate(&content, &job.source_language, &job.target_language).await {
            Ok(text) => {
                target.content = Some(text);
                target.transition(ResourceStatus::Completed)?;
                p.resources.update_summary(&target).await?;
                p.cache.refresh_summary(&target).await;
                Ok(())
            }
            Err(e) => {
                target.transition(ResourceStatus::Failed)?;
                target.error = Some(e.to_string());
                if let Err(store_err) = p.resources.update_summary(&target).await {
                    error!("Failed to record translation failure: {}", store_err);
                }
                p.cache.refresh_summary(&target).await;
                Err(e)
            }
        }
    }
}

fn missing_source(job: &TranslationJob) -> TldwError {
    TldwError::Translation(format!(
        "no completed {} {} for video {}",
        job.source_language, job.resource, job.video_id
    ))
}

#[async_trait]
impl JobHandler for TranslationHandler {
    #[instrument(skip_all, fields(job = %job.id))]
    async fn handle(&self, job: &JobRecord) -> Result<()> {
        let JobPayload::Translation(payload) = &job.payload else {
            return Err(wrong_payload(ResourceKind::Translation, job));
        };
        match payload.resource {
            ResourceKind::Transcript => self.translate_transcript(payload).await,
            ResourceKind::Summary => self.translate_summary(payload).await,
            ResourceKind::Translation => Err(TldwError::InvalidJob(
                "only transcripts and summaries can be translated".to_string(),
            )),
        }
    }

    async fn on_exhausted(&self, job: &JobRecord, error: &str) {
        let JobPayload::Translation(payload) = &job.payload else {
            return;
        };
        let (video, target) = (&payload.video_id, &payload.target_language);
        match payload.resource {
            ResourceKind::Transcript => fail_abandoned_transcript(&self.pipeline, video, target, error).await,
            ResourceKind::Summary => fail_abandoned_summary(&self.pipeline, video, target, error).await,
            ResourceKind::Translation => {}
        }
    }
}
