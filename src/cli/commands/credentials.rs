//! Credentials command: list health state and sweep cooled-down keys.

use crate::cli::{CredentialsAction, Output};
use crate::config::Settings;
use crate::generation::{mask, Credential, CredentialGateway, CredentialStatus};
use crate::store;
use anyhow::Result;
use console::style;

/// Run the credentials command.
pub async fn run_credentials(action: &CredentialsAction, settings: Settings) -> Result<()> {
    let kv = store::connect(&settings).await?;
    let gateway = CredentialGateway::new(kv, &settings.generation);

    if gateway.credentials().is_empty() {
        Output::warning("No credentials configured.");
        Output::info("Add [[generation.credentials]] entries to the config, or set TLDW_API_KEYS.");
        return Ok(());
    }

    match action {
        CredentialsAction::List => {
            Output::header("Credentials");
            for (credential, status) in gateway.list().await? {
                let usage = gateway.minute_usage(&credential.id).await.unwrap_or(0);
                println!("{}", describe(&credential, &status, usage));
            }
        }

        CredentialsAction::Sweep => {
            let reactivated = gateway.sweep().await?;
            if reactivated.is_empty() {
                Output::info("No credentials were ready for reactivation.");
            } else {
                for id in &reactivated {
                    Output::list_item(id);
                }
                Output::success(&format!("Reactivated {} credential(s).", reactivated.len()));
            }
        }
    }

    Ok(())
}

/// One line per credential, never showing more than the key's tail.
fn describe(credential: &Credential, status: &CredentialStatus, minute_usage: u32) -> String {
    let state = if status.active {
        style("active").green().to_string()
    } else {
        let cause = status
            .deactivated_for
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        style(format!("inactive ({})", cause)).red().to_string()
    };

    let mut line = format!(
        "  {} {} [{}] {} - uses: {}, errors: {}, this minute: {}/{}",
        style("*").cyan(),
        style(&credential.label).bold(),
        mask(&credential.api_key),
        state,
        status.total_uses,
        status.error_count,
        minute_usage,
        credential.rate_limit_per_minute
    );
    if let Some(at) = status.last_error_at {
        let class = status.last_error.map(|c| c.to_string()).unwrap_or_default();
        line.push_str(&format!(", last error: {} at {}", class, at.format("%Y-%m-%d %H:%M")));
    }
    line
}
