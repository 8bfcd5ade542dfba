//! Text generation behind a rotating pool of API credentials.
//!
//! - `credentials` - credential records, rotation and health state
//! - `openai` - the OpenAI-backed [`TextGenerator`]

mod credentials;
mod openai;

pub use credentials::{mask, Credential, CredentialGateway, CredentialStatus};
pub use openai::OpenAIGenerator;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    InvalidCredential,
    QuotaExhausted,
    RateLimited,
    Forbidden,
    Safety,
    Network,
    Timeout,
    BadRequest,
    Server,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::InvalidCredential => "invalid_credential",
            ErrorClass::QuotaExhausted => "quota_exhausted",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Forbidden => "forbidden",
            ErrorClass::Safety => "safety",
            ErrorClass::Network => "network",
            ErrorClass::Timeout => "timeout",
            ErrorClass::BadRequest => "bad_request",
            ErrorClass::Server => "server",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// Failures that disable a credential on the first occurrence.
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            ErrorClass::InvalidCredential
                | ErrorClass::QuotaExhausted
                | ErrorClass::RateLimited
                | ErrorClass::Forbidden
        )
    }

    /// Failures tied to the credential rather than the request; another
    /// credential may succeed.
    pub fn is_credential_scoped(&self) -> bool {
        self.is_hard()
    }

    /// Failures worth retrying the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimited
                | ErrorClass::Network
                | ErrorClass::Timeout
                | ErrorClass::Server
                | ErrorClass::Unknown
        )
    }

    /// Whether a sweep may bring back a credential disabled for this class.
    pub fn allows_reactivation(&self) -> bool {
        !matches!(
            self,
            ErrorClass::InvalidCredential | ErrorClass::QuotaExhausted | ErrorClass::Forbidden
        )
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the text generation gateway.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("No active API credentials available")]
    NoCredentialsAvailable,

    #[error("Provider error ({class}): {message}")]
    Provider { class: ErrorClass, message: String },

    #[error("Empty response from model")]
    EmptyResponse,
}

impl GenerationError {
    pub fn provider(class: ErrorClass, message: impl Into<String>) -> Self {
        GenerationError::Provider {
            class,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            GenerationError::NoCredentialsAvailable => ErrorClass::RateLimited,
            GenerationError::Provider { class, .. } => *class,
            GenerationError::EmptyResponse => ErrorClass::Unknown,
        }
    }

    /// Whether a later retry of the whole job could succeed.
    pub fn is_retryable(&self) -> bool {
        self.class().is_transient()
    }
}

/// One generation call: system instructions plus the user document.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Trait for text generation providers.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_rules() {
        assert!(ErrorClass::InvalidCredential.is_hard());
        assert!(!ErrorClass::InvalidCredential.allows_reactivation());
        assert!(ErrorClass::RateLimited.is_hard());
        assert!(ErrorClass::RateLimited.allows_reactivation());
        assert!(!ErrorClass::Network.is_hard());
        assert!(ErrorClass::Network.is_transient());
        assert!(!ErrorClass::Safety.is_transient());
        assert!(!ErrorClass::BadRequest.is_transient());
    }

    #[test]
    fn test_error_class_serialization() {
        let json = serde_json::to_string(&ErrorClass::QuotaExhausted).unwrap();
        assert_eq!(json, "\"quota_exhausted\"");
    }

    #[test]
    fn test_generation_error_retryability() {
        assert!(GenerationError::provider(ErrorClass::Server, "502").is_retryable());
        assert!(!GenerationError::provider(ErrorClass::Safety, "blocked").is_retryable());
        assert!(GenerationError::NoCredentialsAvailable.is_retryable());
    }
}
