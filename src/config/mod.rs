//! Configuration module for tldw.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{MergePrompts, Prompts, SummaryPrompts, TranslationPrompts};
pub use settings::{
    CacheSettings, CredentialSettings, DatabaseSettings, GeneralSettings, GenerationSettings,
    LanguageSettings, LockSettings, PromptSettings, QueueSettings, RedisSettings, ServerSettings,
    Settings, SummarizerSettings, YoutubeSettings,
};
