//! CLI command implementations.

mod config;
mod credentials;
mod doctor;
mod resource;
mod serve;
mod worker;

pub use config::run_config;
pub use credentials::run_credentials;
pub use doctor::run_doctor;
pub use resource::{run_delete, run_request, run_restart, run_status};
pub use serve::run_serve;
pub use worker::run_worker;

use crate::config::Settings;
use crate::resources::ResourceKind;

/// Parse a resource kind given on the command line.
fn parse_kind(kind: &str) -> anyhow::Result<ResourceKind> {
    match kind.parse::<ResourceKind>() {
        Ok(ResourceKind::Translation) | Err(_) => anyhow::bail!(
            "Unknown resource kind '{}'. Use 'transcript' or 'summary'.",
            kind
        ),
        Ok(kind) => Ok(kind),
    }
}

/// The requested language, or the configured default.
fn language_or_default(language: Option<&str>, settings: &Settings) -> String {
    language
        .map(str::to_string)
        .unwrap_or_else(|| settings.languages.default_language.clone())
}
