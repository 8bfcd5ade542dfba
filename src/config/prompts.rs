//! Prompt templates for tldw.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub summary: SummaryPrompts,
    pub merge: MergePrompts,
    pub translation: TranslationPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for summarizing a transcript or a single chunk of one.
///
/// `variants` is ordered from most to least demanding; retry N uses variant N
/// (the last variant is reused if there are more attempts than variants).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryPrompts {
    pub system: String,
    pub variants: Vec<String>,
}

impl Default for SummaryPrompts {
    fn default() -> Self {
        Self {
            system: r#"You summarize YouTube video transcripts. Write in {{language_name}} ({{language}}), regardless of the transcript's language.

Guidelines:
- Capture the substantive points, arguments and conclusions
- Skip sponsor reads, subscription requests, intros and outros
- Never invent content that is not in the transcript
- Use short paragraphs separated by a blank line"#
                .to_string(),
            variants: vec![
                r#"{{part_header}}Summarize the following transcript. Start with a one-paragraph overview, then list the key points with a sentence of context each.

Transcript:
{{text}}"#
                    .to_string(),
                r#"{{part_header}}Write a concise summary of the main ideas in this transcript.

Transcript:
{{text}}"#
                    .to_string(),
                r#"Summarize this text in a few sentences:

{{text}}"#
                    .to_string(),
            ],
        }
    }
}

/// Prompts for consolidating partial (per-chunk) summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePrompts {
    pub system: String,
    pub user: String,
}

impl Default for MergePrompts {
    fn default() -> Self {
        Self {
            system: r#"You merge partial summaries of consecutive sections of one video into a single coherent summary. Write in {{language_name}} ({{language}}).

Guidelines:
- Remove repetition between sections
- Keep the chronological flow of the video
- Ignore section placeholders that say no summary was available"#
                .to_string(),
            user: r#"The video was split into {{part_count}} sections. Here are their summaries in order:

{{text}}

Write the final summary: a one-paragraph overview followed by the key points."#
                .to_string(),
        }
    }
}

/// Prompts for translating transcripts and summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationPrompts {
    pub system: String,
    pub user: String,
}

impl Default for TranslationPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a professional translator. Translate faithfully from {{source_language_name}} to {{target_language_name}}. Preserve paragraph breaks. Output only the translation, without commentary."#
                .to_string(),
            user: r#"{{text}}"#.to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        // Store custom variables
        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let summary_path = custom_path.join("summary.toml");
            if summary_path.exists() {
                let content = std::fs::read_to_string(&summary_path)?;
                prompts.summary = toml::from_str(&content)?;
            }

            let merge_path = custom_path.join("merge.toml");
            if merge_path.exists() {
                let content = std::fs::read_to_string(&merge_path)?;
                prompts.merge = toml::from_str(&content)?;
            }

            let translation_path = custom_path.join("translation.toml");
            if translation_path.exists() {
                let content = std::fs::read_to_string(&translation_path)?;
                prompts.translation = toml::from_str(&content)?;
            }
        }

        if prompts.summary.variants.is_empty() {
            return Err(crate::error::TldwError::Config(
                "summary prompts need at least one variant".to_string(),
            ));
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts() {
        let prompts = Prompts::default();
        assert!(!prompts.summary.system.is_empty());
        assert_eq!(prompts.summary.variants.len(), 3);
        assert!(prompts.translation.system.contains("{{target_language_name}}"));
    }

    #[test]
    fn test_render_template() {
        let template = "Hello {{name}}, you have {{count}} messages.";
        let mut vars = HashMap::new();
        vars.insert("name".to_string(), "Alice".to_string());
        vars.insert("count".to_string(), "5".to_string());

        let result = Prompts::render(template, &vars);
        assert_eq!(result, "Hello Alice, you have 5 messages.");
    }

    #[test]
    fn test_custom_variables_are_overridden_by_call_site() {
        let mut prompts = Prompts::default();
        prompts.variables.insert("tone".to_string(), "formal".to_string());
        prompts.variables.insert("text".to_string(), "ignored".to_string());

        let mut vars = HashMap::new();
        vars.insert("text".to_string(), "used".to_string());

        let rendered = prompts.render_with_custom("{{tone}}: {{text}}", &vars);
        assert_eq!(rendered, "formal: used");
    }

    #[test]
    fn test_custom_dir_overrides_summary_prompts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("summary.toml"),
            "system = \"Be brief.\"\nvariants = [\"{{text}}\"]\n",
        )
        .unwrap();

        let prompts = Prompts::load(dir.path().to_str(), None).unwrap();
        assert_eq!(prompts.summary.system, "Be brief.");
        assert_eq!(prompts.summary.variants, vec!["{{text}}".to_string()]);
        assert!(!prompts.merge.user.is_empty());
    }
}
