//! Inline translation of transcripts and summaries.

use crate::config::{Prompts, SummarizerSettings};
use crate::error::{Result, TldwError};
use crate::generation::{GenerationRequest, TextGenerator};
use crate::language;
use crate::summarizer::{chunk_text, PromptPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Translates text through the generation gateway.
///
/// Text above the chunk threshold is translated chunk by chunk, in order,
/// and rejoined with blank lines.
pub struct Translator {
    generator: Arc<dyn TextGenerator>,
    prompts: Prompts,
    chunk_threshold: usize,
    policy: PromptPolicy,
}

impl Translator {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: Prompts, settings: &SummarizerSettings) -> Self {
        let policy = PromptPolicy::new(
            vec![prompts.translation.user.clone()],
            settings.attempts,
            settings.retry_base(),
        );
        Self {
            generator,
            prompts,
            chunk_threshold: settings.chunk_threshold,
            policy,
        }
    }

    #[instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String> {
        if source == target {
            return Ok(text.to_string());
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(TldwError::Translation("Nothing to translate".to_string()));
        }

        let mut vars = HashMap::new();
        vars.insert("source_language".to_string(), source.to_string());
        vars.insert("source_language_name".to_string(), language::display_name(source));
        vars.insert("target_language".to_string(), target.to_string());
        vars.insert("target_language_name".to_string(), language::display_name(target));
        let system = self.prompts.render_with_custom(&self.prompts.translation.system, &vars);

        let chunks = chunk_text(text, self.chunk_threshold);
        let count = chunks.len();
        let mut translated = Vec::with_capacity(count);

        for (idx, chunk) in chunks.into_iter().enumerate() {
            debug!(chunk = idx + 1, count, "Translating chunk");
            let mut chunk_vars = vars.clone();
            chunk_vars.insert("text".to_string(), chunk);

            let label = format!("translate {}->{} {}/{}", source, target, idx + 1, count);
            let output = self
                .policy
                .run(&label, |_, template| {
                    let request = GenerationRequest::new(
                        system.clone(),
                        self.prompts.render_with_custom(&template, &chunk_vars),
                    )
                    .with_temperature(0.1);
                    async move { self.generator.generate(&request).await }
                })
                .await?;
            translated.push(output);
        }

        Ok(translated.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::FnGenerator;
    use crate::generation::{ErrorClass, GenerationError};

    fn settings(threshold: usize) -> SummarizerSettings {
        SummarizerSettings {
            chunk_threshold: threshold,
            ..SummarizerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_translate_renders_language_names() {
        let generator = Arc::new(FnGenerator::new(|_, request| Ok(format!("EN[{}]", request.user))));
        let translator = Translator::new(generator.clone(), Prompts::default(), &settings(30_000));

        let output = translator.translate("Merhaba dünya.", "tr", "en").await.unwrap();

        assert_eq!(output, "EN[Merhaba dünya.]");
        let requests = generator.requests.lock().unwrap();
        assert!(requests[0].system.contains("from Turkish to English"));
    }

    #[tokio::test]
    async fn test_long_text_is_translated_in_order() {
        let generator = Arc::new(FnGenerator::new(|call, _| Ok(format!("part {}", call))));
        let translator = Translator::new(generator.clone(), Prompts::default(), &settings(40));

        let text = "This is the first sentence here. This is the second sentence here. And a third one.";
        let output = translator.translate(text, "en", "tr").await.unwrap();

        assert_eq!(generator.calls(), 3);
        assert_eq!(output, "part 0\n\npart 1\n\npart 2");
    }

    #[tokio::test]
    async fn test_same_language_is_passthrough() {
        let generator = Arc::new(FnGenerator::new(|_, _| Ok("changed".to_string())));
        let translator = Translator::new(generator.clone(), Prompts::default(), &settings(30_000));

        assert_eq!(translator.translate("text", "en", "en").await.unwrap(), "text");
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_errors_keep_their_class() {
        let generator = Arc::new(FnGenerator::new(|_, _| {
            Err(GenerationError::provider(ErrorClass::QuotaExhausted, "quota").into())
        }));
        let translator = Translator::new(generator, Prompts::default(), &settings(30_000));

        let err = translator.translate("Hallo.", "de", "en").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
