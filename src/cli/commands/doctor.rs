//! Doctor command - verify system requirements and configuration.

use crate::cli::output::content_preview;
use crate::cli::Output;
use crate::config::Settings;
use crate::generation::{mask, CredentialGateway};
use crate::queue::Queues;
use crate::resources::ResourceKind;
use crate::store::{self, KvStore};
use console::style;
use std::process::Command;
use std::sync::Arc;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

fn print_section(title: &str, checks: &[CheckResult]) {
    println!("{}", style(title).bold());
    for check in checks {
        check.print();
    }
    println!();
}

/// Run all diagnostic checks.
pub async fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("tldw Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    let tools = vec![check_tool(
        "yt-dlp",
        &settings.youtube.ytdlp_path,
        install_hint_ytdlp(),
    )];
    print_section("External Tools", &tools);
    checks.extend(tools);

    let (kv_check, kv) = check_kv_store(settings).await;
    let mut shared = vec![kv_check];
    if let Some(kv) = &kv {
        shared.extend(check_queues(kv.clone(), settings).await);
    }
    print_section("Shared Store", &shared);
    checks.extend(shared);

    let credentials = match &kv {
        Some(kv) => check_credentials(kv.clone(), settings).await,
        None => vec![check_credentials_configured(settings)],
    };
    print_section("API Credentials", &credentials);
    checks.extend(credentials);

    let directories = check_directories(settings);
    print_section("Directories", &directories);
    checks.extend(directories);

    let config = vec![check_config_file()];
    print_section("Configuration", &config);
    checks.extend(config);

    // Summary
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before running tldw.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!(
            "All checks passed with {} warning(s).",
            warnings
        ));
    } else {
        Output::success("All checks passed! tldw is ready to use.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, binary: &str, hint: &str) -> CheckResult {
    match Command::new(binary).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .to_string();

            CheckResult::ok(name, &content_preview(&version, 50))
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            CheckResult::error(name, &format!("not found ({})", binary), hint)
        }
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Connect to the shared store and ping it.
async fn check_kv_store(settings: &Settings) -> (CheckResult, Option<Arc<dyn KvStore>>) {
    if settings.redis.url.trim().is_empty() {
        return (
            CheckResult::warning(
                "Key-value store",
                "in-process (no redis.url)",
                "Locks and queues are not shared between processes; set redis.url for multi-worker setups",
            ),
            store::connect(settings).await.ok(),
        );
    }

    let hint = "Check that Redis is running and redis.url is correct";
    match store::connect(settings).await {
        Ok(kv) => match kv.ping().await {
            Ok(()) => (CheckResult::ok("Redis", &settings.redis.url), Some(kv)),
            Err(e) => (CheckResult::error("Redis", &format!("ping failed: {}", e), hint), None),
        },
        Err(e) => (CheckResult::error("Redis", &format!("connection failed: {}", e), hint), None),
    }
}

/// Report queue sizes and flag disabled queues.
async fn check_queues(kv: Arc<dyn KvStore>, settings: &Settings) -> Vec<CheckResult> {
    let queues = Queues::new(kv, &settings.queue);
    let mut results = Vec::new();

    for kind in [ResourceKind::Transcript, ResourceKind::Summary, ResourceKind::Translation] {
        let name = format!("{} queue", kind);
        let slots = match kind {
            ResourceKind::Transcript => settings.queue.transcript_concurrency,
            ResourceKind::Summary => settings.queue.summary_concurrency,
            ResourceKind::Translation => settings.queue.translation_concurrency,
        };

        match queues.for_kind(kind).counts().await {
            Ok(counts) => {
                let message = format!(
                    "{} waiting, {} delayed, {} active ({} slots)",
                    counts.waiting, counts.delayed, counts.active, slots
                );
                if slots == 0 && counts.waiting + counts.delayed > 0 {
                    results.push(CheckResult::warning(
                        &name,
                        &message,
                        "Jobs are waiting but this queue has no worker slots configured",
                    ));
                } else {
                    results.push(CheckResult::ok(&name, &message));
                }
            }
            Err(e) => results.push(CheckResult::error(
                &name,
                &format!("unreadable: {}", e),
                "Check the key-value store",
            )),
        }
    }

    results
}

fn check_credentials_configured(settings: &Settings) -> CheckResult {
    let count = settings.generation.resolved_credentials().len();
    if count == 0 {
        CheckResult::error(
            "Credentials",
            "none configured",
            "Add [[generation.credentials]] to the config, or set TLDW_API_KEYS / OPENAI_API_KEY",
        )
    } else {
        CheckResult::ok("Credentials", &format!("{} configured", count))
    }
}

/// Check configured credentials and their shared health state.
async fn check_credentials(kv: Arc<dyn KvStore>, settings: &Settings) -> Vec<CheckResult> {
    let gateway = CredentialGateway::new(kv, &settings.generation);
    if gateway.credentials().is_empty() {
        return vec![check_credentials_configured(settings)];
    }

    let entries = match gateway.list().await {
        Ok(entries) => entries,
        Err(e) => {
            return vec![CheckResult::error(
                "Credentials",
                &format!("status unreadable: {}", e),
                "Check the key-value store",
            )]
        }
    };

    let active = entries.iter().filter(|(_, status)| status.active).count();
    let mut results: Vec<CheckResult> = entries
        .iter()
        .map(|(credential, status)| {
            let name = format!("{} ({})", credential.label, mask(&credential.api_key));
            if status.active {
                CheckResult::ok(&name, "active")
            } else {
                let cause = status
                    .deactivated_for
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                CheckResult::warning(
                    &name,
                    &format!("inactive ({})", cause),
                    "Run `tldw credentials sweep` once the cause has passed",
                )
            }
        })
        .collect();

    if active == 0 {
        results.push(CheckResult::error(
            "Credentials",
            "no active credential",
            "Summaries and translations fail until a credential is reactivated",
        ));
    }
    results
}

/// Check data directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok(
            "Data directory",
            &format!("{}", data_dir.display()),
        ));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    let db_path = settings.sqlite_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Database",
            &format!("{} ({})", db_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Database",
            &format!("{} (not created yet)", db_path.display()),
            "Database will be created on first request",
        ));
    }

    results
}

/// Check if config file exists.
fn check_config_file() -> CheckResult {
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        CheckResult::ok("Config file", &format!("{}", config_path.display()))
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: tldw config edit",
        )
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialSettings;
    use crate::generation::ErrorClass;
    use crate::queue::JobPayload;
    use crate::store::MemoryStore;

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_missing_tool_is_an_error() {
        let result = check_tool("nope", "definitely-not-a-real-binary-tldw", "install it");
        assert_eq!(result.status, CheckStatus::Error);
    }

    #[tokio::test]
    async fn test_waiting_jobs_on_disabled_queue_warn() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let settings = Settings::default();
        let queues = Queues::new(kv.clone(), &settings.queue);
        queues
            .enqueue(JobPayload::translation("v1", "en", "tr", ResourceKind::Transcript))
            .await
            .unwrap();

        let results = check_queues(kv, &settings).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, CheckStatus::Ok);
        assert_eq!(results[2].status, CheckStatus::Warning);
        assert!(results[2].message.starts_with("1 waiting"));
    }

    #[tokio::test]
    async fn test_all_credentials_inactive_is_an_error() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut settings = Settings::default();
        settings.generation.credentials = vec![CredentialSettings {
            label: Some("only".to_string()),
            api_key: "sk-only-key-0001".to_string(),
            rate_limit_per_minute: 60,
        }];
        let gateway = CredentialGateway::new(kv.clone(), &settings.generation);
        for _ in 0..settings.generation.error_threshold.max(1) {
            gateway.mark_error("only", ErrorClass::QuotaExhausted).await.unwrap();
        }

        let results = check_credentials(kv, &settings).await;

        assert!(results.iter().any(|r| r.status == CheckStatus::Error));
        assert_eq!(results[0].status, CheckStatus::Warning);
    }
}
