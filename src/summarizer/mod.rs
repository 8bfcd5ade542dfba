//! Chunk-and-merge summarization.
//!
//! Text under the chunk threshold is summarized in one call. Longer text is
//! split on sentence boundaries, each chunk is summarized independently, and
//! a final pass merges the partial summaries.

mod chunking;
mod policy;

pub use chunking::{chunk_text, split_sentences};
pub use policy::PromptPolicy;

use crate::config::{Prompts, SummarizerSettings};
use crate::error::{Result, TldwError};
use crate::generation::{GenerationRequest, TextGenerator};
use crate::language;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Stands in for a chunk whose summary could not be generated.
pub const NO_SUMMARY_PLACEHOLDER: &str = "[No summary available for this section]";

pub struct Summarizer {
    generator: Arc<dyn TextGenerator>,
    prompts: Prompts,
    settings: SummarizerSettings,
}

impl Summarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Prompts, settings: SummarizerSettings) -> Self {
        Self {
            generator,
            prompts,
            settings,
        }
    }

    fn summary_policy(&self) -> PromptPolicy {
        PromptPolicy::new(
            self.prompts.summary.variants.clone(),
            self.settings.attempts,
            self.settings.retry_base(),
        )
    }

    fn language_vars(language: &str) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("language".to_string(), language.to_string());
        vars.insert("language_name".to_string(), language::display_name(language));
        vars
    }

    /// Summarize `text` in `language`.
    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn summarize(&self, text: &str, language: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TldwError::Summarization("Transcript is empty".to_string()));
        }

        let chunks = chunk_text(text, self.settings.chunk_threshold);
        let summary = if chunks.len() <= 1 {
            debug!("Summarizing directly");
            self.summarize_part(text, language, None).await?
        } else {
            info!(chunks = chunks.len(), "Summarizing in chunks");
            let partials = self.summarize_chunks(chunks, language).await?;
            self.merge(&partials, language).await
        };

        let summary = normalize_paragraphs(&summary);
        if let Some(detected) = language::detect(&summary) {
            if !language::matches(language, detected) {
                warn!(expected = language, detected, "Summary language does not match request");
            }
        }
        Ok(summary)
    }

    /// Summarize one chunk (or the whole text) through the prompt policy.
    async fn summarize_part(
        &self,
        text: &str,
        language: &str,
        part: Option<(usize, usize)>,
    ) -> Result<String> {
        let mut vars = Self::language_vars(language);
        let system = self.prompts.render_with_custom(&self.prompts.summary.system, &vars);
        let part_header = match part {
            Some((idx, count)) => format!("This is part {} of {} of the transcript.\n\n", idx + 1, count),
            None => String::new(),
        };
        vars.insert("part_header".to_string(), part_header);
        vars.insert("text".to_string(), text.to_string());

        let label = match part {
            Some((idx, count)) => format!("chunk {}/{}", idx + 1, count),
            None => "summary".to_string(),
        };

        self.summary_policy()
            .run(&label, |_, template| {
                let request = GenerationRequest::new(
                    system.clone(),
                    self.prompts.render_with_custom(&template, &vars),
                );
                async move { self.generator.generate(&request).await }
            })
            .await
    }

    /// Summarize every chunk, substituting the placeholder for failed ones.
    async fn summarize_chunks(&self, chunks: Vec<String>, language: &str) -> Result<Vec<String>> {
        let count = chunks.len();
        let concurrency = self.settings.max_concurrent_chunks.max(1);

        let mut results: Vec<(usize, Result<String>)> = stream::iter(chunks.into_iter().enumerate())
            .map(|(idx, chunk)| async move {
                let result = self.summarize_part(&chunk, language, Some((idx, count))).await;
                (idx, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);

        let mut partials = Vec::with_capacity(count);
        let mut failures = Vec::new();
        for (idx, result) in results {
            match result {
                Ok(summary) => partials.push(summary),
                Err(e) => {
                    warn!(chunk = idx + 1, error = %e, "Chunk summary exhausted its attempts");
                    failures.push(e);
                    partials.push(NO_SUMMARY_PLACEHOLDER.to_string());
                }
            }
        }

        if failures.len() == count {
            let last = failures
                .pop()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(TldwError::Summarization(format!(
                "All {} chunks failed to summarize: {}",
                count, last
            )));
        }
        Ok(partials)
    }

    /// Consolidate partial summaries; the joined partials are the fallback.
    async fn merge(&self, partials: &[String], language: &str) -> String {
        let joined = partials.join("\n\n");

        let mut vars = Self::language_vars(language);
        let system = self.prompts.render_with_custom(&self.prompts.merge.system, &vars);
        let numbered = partials
            .iter()
            .enumerate()
            .map(|(idx, p)| format!("Section {}:\n{}", idx + 1, p))
            .collect::<Vec<_>>()
            .join("\n\n");
        vars.insert("part_count".to_string(), partials.len().to_string());
        vars.insert("text".to_string(), numbered);

        let policy = PromptPolicy::new(
            vec![self.prompts.merge.user.clone()],
            self.settings.attempts,
            self.settings.retry_base(),
        );
        let merged = policy
            .run("merge", |_, template| {
                let request = GenerationRequest::new(
                    system.clone(),
                    self.prompts.render_with_custom(&template, &vars),
                );
                async move { self.generator.generate(&request).await }
            })
            .await;

        match merged {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Merge pass failed, returning joined partial summaries");
                joined
            }
        }
    }
}

/// Trim lines and collapse runs of blank lines to a single one.
pub fn normalize_paragraphs(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() && out.last().map_or(true, |l| l.is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}
