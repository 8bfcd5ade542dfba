//! Configuration settings for tldw.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub redis: RedisSettings,
    pub database: DatabaseSettings,
    pub queue: QueueSettings,
    pub lock: LockSettings,
    pub cache: CacheSettings,
    pub languages: LanguageSettings,
    pub generation: GenerationSettings,
    pub summarizer: SummarizerSettings,
    pub youtube: YoutubeSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory for temporary files (caption downloads).
    pub temp_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.tldw".to_string(),
            temp_dir: "/tmp/tldw".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Shared key-value store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Redis URL. Empty selects the in-process store (single process only).
    pub url: String,
    /// Prefix applied to every key.
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "tldw:".to_string(),
        }
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Path to the SQLite database.
    pub sqlite_path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            sqlite_path: "~/.tldw/tldw.db".to_string(),
        }
    }
}

/// Job queue and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Concurrent transcript jobs per worker process.
    pub transcript_concurrency: usize,
    /// Concurrent summary jobs per worker process.
    pub summary_concurrency: usize,
    /// Concurrent translation jobs per worker process (0 disables the queue).
    pub translation_concurrency: usize,
    /// Attempts per job, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_ms: u64,
    /// Lease held by an active job; renewed at half this interval.
    pub lock_duration_secs: u64,
    /// How often expired leases are swept.
    pub stalled_interval_secs: u64,
    /// How many times a job may stall before it fails permanently.
    pub max_stalled_count: u32,
    /// Sleep between polls of an empty queue.
    pub poll_interval_ms: u64,
    /// Retention for finished job records.
    pub keep_finished_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            transcript_concurrency: 2,
            summary_concurrency: 1,
            translation_concurrency: 0,
            attempts: 3,
            backoff_ms: 2000,
            lock_duration_secs: 30,
            stalled_interval_secs: 30,
            max_stalled_count: 1,
            poll_interval_ms: 500,
            keep_finished_secs: 3600,
        }
    }
}

impl QueueSettings {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_secs)
    }

    pub fn stalled_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn keep_finished(&self) -> Duration {
        Duration::from_secs(self.keep_finished_secs)
    }
}

/// Distributed lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Lock TTL in seconds.
    pub ttl_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self { ttl_secs: 30 }
    }
}

/// Cache TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Completed transcripts.
    pub transcript_ttl_secs: u64,
    /// Completed transcripts taken from manually authored captions.
    pub manual_transcript_ttl_secs: u64,
    /// Completed summaries.
    pub summary_ttl_secs: u64,
    /// Resources still pending or processing.
    pub volatile_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            transcript_ttl_secs: 6 * 3600,
            manual_transcript_ttl_secs: 24 * 3600,
            summary_ttl_secs: 6 * 3600,
            volatile_ttl_secs: 5 * 60,
        }
    }
}

/// Language fallback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageSettings {
    /// Language used when a request does not name one.
    pub default_language: String,
    /// Alternate source languages, tried in order.
    pub fallback_order: Vec<String>,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            default_language: "en".to_string(),
            fallback_order: vec!["en".to_string(), "tr".to_string()],
        }
    }
}

/// One API credential for the text generation provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Human-readable label, shown in `credentials list`.
    #[serde(default)]
    pub label: Option<String>,
    /// The API key.
    pub api_key: String,
    /// Requests per minute before the credential is rested.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

fn default_rate_limit() -> u32 {
    60
}

/// Text generation gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Chat model used for summaries and translations.
    pub model: String,
    /// Optional API base URL (OpenAI-compatible providers).
    pub api_base: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Configured credentials. Falls back to TLDW_API_KEYS / OPENAI_API_KEY.
    pub credentials: Vec<CredentialSettings>,
    /// Soft errors tolerated before a credential is deactivated.
    pub error_threshold: u32,
    /// Cool-down before a soft-failed credential is reactivated.
    pub cooldown_secs: u64,
    /// Interval between reactivation sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_base: None,
            timeout_secs: 300,
            credentials: Vec::new(),
            error_threshold: 5,
            cooldown_secs: 300,
            sweep_interval_secs: 3 * 3600,
        }
    }
}

impl GenerationSettings {
    /// Configured credentials, or credentials taken from the environment.
    pub fn resolved_credentials(&self) -> Vec<CredentialSettings> {
        if !self.credentials.is_empty() {
            return self.credentials.clone();
        }

        let from_env = std::env::var("TLDW_API_KEYS")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default();

        from_env
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|key| CredentialSettings {
                label: None,
                api_key: key.to_string(),
                rate_limit_per_minute: default_rate_limit(),
            })
            .collect()
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Chunk-and-merge summarizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
    /// Character count above which transcripts are chunked.
    pub chunk_threshold: usize,
    /// Attempts per generation call.
    pub attempts: u32,
    /// Delay before the first retry of a generation call.
    pub retry_base_ms: u64,
    /// Chunks summarized concurrently.
    pub max_concurrent_chunks: usize,
    /// Deadline for clients waiting on summary creation.
    pub wait_timeout_secs: u64,
    /// Age after which a pending/processing summary may be restarted.
    pub stale_after_secs: u64,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            chunk_threshold: 30_000,
            attempts: 3,
            retry_base_ms: 1000,
            max_concurrent_chunks: 2,
            wait_timeout_secs: 15 * 60,
            stale_after_secs: 30 * 60,
        }
    }
}

impl SummarizerSettings {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_millis(self.retry_base_ms)
    }
}

/// YouTube caption settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    /// yt-dlp binary to invoke.
    pub ytdlp_path: String,
    /// Accept automatically generated captions when no manual track exists.
    pub allow_automatic_captions: bool,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            allow_automatic_captions: true,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Suggested client poll interval, returned with status responses.
    pub poll_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            poll_interval_ms: 2000,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TldwError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tldw")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded temp directory path.
    pub fn temp_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.temp_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.database.sqlite_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_contract() {
        let settings = Settings::default();
        assert_eq!(settings.queue.transcript_concurrency, 2);
        assert_eq!(settings.queue.summary_concurrency, 1);
        assert_eq!(settings.queue.attempts, 3);
        assert_eq!(settings.lock.ttl_secs, 30);
        assert_eq!(settings.summarizer.chunk_threshold, 30_000);
        assert_eq!(settings.summarizer.stale_after_secs, 1800);
        assert_eq!(settings.languages.fallback_order, vec!["en", "tr"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [queue]
            summary_concurrency = 3

            [[generation.credentials]]
            api_key = "sk-one"
            "#,
        )
        .unwrap();

        assert_eq!(settings.queue.summary_concurrency, 3);
        assert_eq!(settings.queue.transcript_concurrency, 2);
        assert_eq!(settings.generation.credentials.len(), 1);
        assert_eq!(settings.generation.credentials[0].rate_limit_per_minute, 60);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.languages.fallback_order = vec!["de".to_string()];
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.languages.fallback_order, vec!["de"]);
    }
}
