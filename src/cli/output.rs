//! CLI output formatting utilities.

use crate::resources::{QueryStatus, StatusView};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print a resource status, with its content once completed.
    pub fn status_view(view: &StatusView) {
        let status = status_label(view.status);
        let status = match view.status {
            QueryStatus::Completed => style(status).green().bold(),
            QueryStatus::Failed => style(status).red().bold(),
            QueryStatus::NotFound => style(status).dim(),
            QueryStatus::Pending | QueryStatus::Processing => style(status).yellow().bold(),
        };

        println!(
            "\n{} {} {} ({})",
            style(">>").cyan(),
            style(view.kind).bold(),
            style(&view.video_id).dim(),
            view.language
        );
        Output::kv("Status", &status.to_string());
        if let Some(id) = view.id {
            Output::kv("Id", &id.to_string());
        }
        if let Some(origin) = &view.origin {
            Output::kv("Origin", origin);
        }
        if let Some(updated) = view.updated_at {
            Output::kv("Updated", &updated.format("%Y-%m-%d %H:%M:%S UTC").to_string());
        }
        if let Some(error) = &view.error {
            Output::kv("Error", &style(error).red().to_string());
        }
        if let Some(content) = &view.content {
            println!();
            println!("{}", content);
        }
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

fn status_label(status: QueryStatus) -> &'static str {
    match status {
        QueryStatus::NotFound => "not found",
        QueryStatus::Pending => "pending",
        QueryStatus::Processing => "processing",
        QueryStatus::Completed => "completed",
        QueryStatus::Failed => "failed",
    }
}

/// Truncate content with ellipsis, on a character boundary.
pub(crate) fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let cut: String = content.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
