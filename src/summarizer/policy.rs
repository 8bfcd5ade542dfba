//! Retry policy with progressively simpler prompts.

use crate::error::{Result, TldwError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt N renders prompt variant N, reusing the last variant once the
/// list runs out. Attempts are separated by exponential backoff.
#[derive(Debug, Clone)]
pub struct PromptPolicy {
    variants: Vec<String>,
    attempts: u32,
    base_delay: Duration,
}

impl PromptPolicy {
    pub fn new(variants: Vec<String>, attempts: u32, base_delay: Duration) -> Self {
        Self {
            variants,
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Template for a 1-based attempt number.
    pub fn variant(&self, attempt: u32) -> &str {
        let idx = (attempt.max(1) as usize - 1).min(self.variants.len().saturating_sub(1));
        self.variants.get(idx).map(String::as_str).unwrap_or_default()
    }

    /// Delay before a 1-based attempt; zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * 2u32.saturating_pow(attempt - 2)
    }

    /// Run `call` until it succeeds or attempts run out.
    ///
    /// `call` receives the attempt number and that attempt's template. The
    /// last error is returned on exhaustion.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut(u32, String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.attempts {
            let delay = self.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match call(attempt, self.variant(attempt).to_string()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(label, attempt, max = self.attempts, error = %e, "Generation attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TldwError::Summarization(format!("{}: no attempts were made", label))
        }))
    }
}
