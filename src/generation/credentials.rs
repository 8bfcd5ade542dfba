//! API credential rotation and health tracking.
//!
//! Secrets come from configuration and stay in process memory. Health state
//! lives in the shared key-value store so every worker process sees the same
//! picture. Each fact has its own key and is written with an atomic primitive,
//! never read back and overwritten:
//!
//! - `credential:cursor` - shared round-robin counter
//! - `credential:<id>:uses` and `credential:<id>:errors` - counters
//! - `credential:<id>:last_error` - JSON `Incident`, informational
//! - `credential:<id>:disabled` - JSON `Incident`, set once; the sweep clears it
//! - `credential:<id>:revoked` - JSON `Incident` for causes that are never
//!   reactivated; nothing clears it
//! - `credential:<id>:minute:<n>` - usage counter for minute `n`

use super::{ErrorClass, GenerationError};
use crate::config::GenerationSettings;
use crate::error::Result;
use crate::store::KvStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const CURSOR_KEY: &str = "credential:cursor";

/// Usage counters outlive their minute so a sweep can still read them.
const MINUTE_COUNTER_TTL: Duration = Duration::from_secs(120);

/// A configured API credential.
#[derive(Clone)]
pub struct Credential {
    pub id: String,
    pub label: String,
    pub api_key: String,
    pub rate_limit_per_minute: u32,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("api_key", &mask(&self.api_key))
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish()
    }
}

/// Show only the tail of a secret.
pub fn mask(secret: &str) -> String {
    let tail: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("…{}", tail)
}

/// Shared health state of one credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub active: bool,
    pub total_uses: u64,
    pub error_count: u32,
    pub last_error: Option<ErrorClass>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Why the credential was disabled.
    pub deactivated_for: Option<ErrorClass>,
}

impl Default for CredentialStatus {
    fn default() -> Self {
        Self {
            active: true,
            total_uses: 0,
            error_count: 0,
            last_error: None,
            last_error_at: None,
            deactivated_at: None,
            deactivated_for: None,
        }
    }
}

/// An error class and when it happened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Incident {
    class: ErrorClass,
    at: DateTime<Utc>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Rotates among configured credentials and keeps their health state.
#[derive(Clone)]
pub struct CredentialGateway {
    store: Arc<dyn KvStore>,
    credentials: Vec<Credential>,
    error_threshold: u32,
    cooldown: Duration,
    clock: Clock,
}

impl CredentialGateway {
    pub fn new(store: Arc<dyn KvStore>, settings: &GenerationSettings) -> Self {
        let credentials = settings
            .resolved_credentials()
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let id = c.label.clone().unwrap_or_else(|| format!("key-{}", i + 1));
                Credential {
                    label: c.label.unwrap_or_else(|| id.clone()),
                    id,
                    api_key: c.api_key,
                    rate_limit_per_minute: c.rate_limit_per_minute.max(1),
                }
            })
            .collect();

        Self {
            store,
            credentials,
            error_threshold: settings.error_threshold.max(1),
            cooldown: settings.cooldown(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock (tests).
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn key(id: &str, field: &str) -> String {
        format!("credential:{}:{}", id, field)
    }

    fn minute_key(&self, id: &str) -> String {
        format!("credential:{}:minute:{}", id, self.now().timestamp().div_euclid(60))
    }

    fn find(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }

    async fn incident(&self, id: &str, field: &str) -> Result<Option<Incident>> {
        match self.store.get(&Self::key(id, field)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn counter(&self, key: &str) -> Result<u64> {
        let raw = self.store.get(key).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Whether the credential may be selected.
    async fn is_active(&self, id: &str) -> Result<bool> {
        Ok(!self.store.exists(&Self::key(id, "revoked")).await?
            && !self.store.exists(&Self::key(id, "disabled")).await?)
    }

    /// Take a credential out of rotation. Causes that never allow
    /// reactivation are recorded under a key the sweep never clears; among the
    /// others the first cause wins until swept.
    async fn deactivate(&self, id: &str, class: ErrorClass) -> Result<bool> {
        let field = if class.allows_reactivation() { "disabled" } else { "revoked" };
        let incident = serde_json::to_string(&Incident { class, at: self.now() })?;
        self.store.set_nx(&Self::key(id, field), &incident, None).await
    }

    /// Current health of a credential, assembled from its keys.
    pub async fn status(&self, id: &str) -> Result<CredentialStatus> {
        let deactivation = match self.incident(id, "revoked").await? {
            Some(revoked) => Some(revoked),
            None => self.incident(id, "disabled").await?,
        };
        let last_error = self.incident(id, "last_error").await?;
        let error_count = self.counter(&Self::key(id, "errors")).await?;

        Ok(CredentialStatus {
            active: deactivation.is_none(),
            total_uses: self.counter(&Self::key(id, "uses")).await?,
            error_count: u32::try_from(error_count).unwrap_or(u32::MAX),
            last_error: last_error.map(|e| e.class),
            last_error_at: last_error.map(|e| e.at),
            deactivated_at: deactivation.map(|d| d.at),
            deactivated_for: deactivation.map(|d| d.class),
        })
    }

    /// Requests made with `id` in the current minute.
    pub async fn minute_usage(&self, id: &str) -> Result<u32> {
        let usage = self.counter(&self.minute_key(id)).await?;
        Ok(u32::try_from(usage).unwrap_or(u32::MAX))
    }

    /// Next active credential in round-robin order.
    pub async fn active_credential(&self) -> Result<Credential> {
        let count = self.credentials.len();
        if count == 0 {
            return Err(GenerationError::NoCredentialsAvailable.into());
        }

        for _ in 0..count {
            let cursor = self.store.incr(CURSOR_KEY, None).await?;
            let index = (cursor - 1).rem_euclid(count as i64) as usize;
            let credential = &self.credentials[index];

            if !self.is_active(&credential.id).await? {
                continue;
            }
            if self.minute_usage(&credential.id).await? >= credential.rate_limit_per_minute {
                self.deactivate(&credential.id, ErrorClass::RateLimited).await?;
                continue;
            }
            debug!(credential = %credential.id, "Selected credential");
            return Ok(credential.clone());
        }

        warn!("Every credential is inactive");
        Err(GenerationError::NoCredentialsAvailable.into())
    }

    /// Count a request and rest the credential once it reaches its ceiling.
    pub async fn record_use(&self, id: &str) -> Result<()> {
        let Some(credential) = self.find(id) else {
            return Ok(());
        };
        self.store.incr(&Self::key(id, "uses"), None).await?;
        let usage = self.store.incr(&self.minute_key(id), Some(MINUTE_COUNTER_TTL)).await?;

        if usage >= i64::from(credential.rate_limit_per_minute)
            && self.deactivate(id, ErrorClass::RateLimited).await?
        {
            info!(credential = %id, usage, "Credential reached its per-minute ceiling");
        }
        Ok(())
    }

    /// Record a provider failure against a credential.
    #[instrument(skip(self))]
    pub async fn mark_error(&self, id: &str, class: ErrorClass) -> Result<()> {
        let errors = self.store.incr(&Self::key(id, "errors"), None).await?;
        let incident = serde_json::to_string(&Incident { class, at: self.now() })?;
        self.store.set(&Self::key(id, "last_error"), &incident, None).await?;

        if (class.is_hard() || errors >= i64::from(self.error_threshold)) && self.deactivate(id, class).await? {
            warn!(credential = %id, errors, "Deactivating credential");
        }
        Ok(())
    }

    /// Reactivate credentials whose cause of deactivation has passed.
    /// Returns the ids brought back.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let now = self.now();
        let cooldown = ChronoDuration::from_std(self.cooldown).unwrap_or(ChronoDuration::MAX);
        let mut reactivated = Vec::new();

        for credential in &self.credentials {
            let id = &credential.id;
            if self.store.exists(&Self::key(id, "revoked")).await? {
                continue;
            }
            let Some(disabled) = self.incident(id, "disabled").await? else {
                continue;
            };
            let ready = match disabled.class {
                ErrorClass::RateLimited => self.minute_usage(id).await? < credential.rate_limit_per_minute,
                _ => now - disabled.at >= cooldown,
            };
            if ready {
                self.store.delete(&Self::key(id, "errors")).await?;
                self.store.delete(&Self::key(id, "disabled")).await?;
                reactivated.push(id.clone());
            }
        }

        if !reactivated.is_empty() {
            info!(count = reactivated.len(), "Reactivated credentials");
        }
        Ok(reactivated)
    }

    /// Run `call` with the next active credential, rotating to another one
    /// while failures are credential-scoped.
    ///
    /// Tries at most once per configured credential. Request-scoped failures
    /// (safety, bad request) are returned without touching credential health.
    pub async fn with_rotation<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = std::result::Result<T, GenerationError>>,
    {
        let mut last_error = GenerationError::NoCredentialsAvailable;

        for _ in 0..self.credentials.len().max(1) {
            let credential = self.active_credential().await?;
            let id = credential.id.clone();
            if let Err(e) = self.record_use(&id).await {
                warn!(credential = %id, "Failed to record credential use: {}", e);
            }

            let error = match call(credential).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let class = error.class();
            if matches!(class, ErrorClass::Safety | ErrorClass::BadRequest) {
                return Err(error.into());
            }
            if let Err(e) = self.mark_error(&id, class).await {
                warn!(credential = %id, "Failed to record credential error: {}", e);
            }
            if !class.is_credential_scoped() {
                return Err(error.into());
            }

            warn!(credential = %id, class = %class, "Credential rejected, rotating");
            last_error = error;
        }

        Err(last_error.into())
    }

    /// Every credential with its current status.
    pub async fn list(&self) -> Result<Vec<(Credential, CredentialStatus)>> {
        let mut entries = Vec::with_capacity(self.credentials.len());
        for credential in &self.credentials {
            entries.push((credential.clone(), self.status(&credential.id).await?));
        }
        Ok(entries)
    }
}
