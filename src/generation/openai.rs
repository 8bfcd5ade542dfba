//! OpenAI chat completions as a [`TextGenerator`].

use super::{CredentialGateway, ErrorClass, GenerationError, GenerationRequest, TextGenerator};
use crate::config::GenerationSettings;
use crate::error::Result;
use crate::openai::create_client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, FinishReason,
};
use async_openai::Client;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

/// Chat-completion generator with one client per credential.
pub struct OpenAIGenerator {
    gateway: CredentialGateway,
    clients: HashMap<String, Client<OpenAIConfig>>,
    model: String,
}

impl OpenAIGenerator {
    pub fn new(gateway: CredentialGateway, settings: &GenerationSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let mut clients = HashMap::new();
        for credential in gateway.credentials() {
            let client = create_client(&credential.api_key, settings.api_base.as_deref(), timeout)?;
            clients.insert(credential.id.clone(), client);
        }

        Ok(Self {
            gateway,
            clients,
            model: settings.model.clone(),
        })
    }

    pub fn gateway(&self) -> &CredentialGateway {
        &self.gateway
    }

    async fn complete(
        &self,
        client: &Client<OpenAIConfig>,
        request: &GenerationRequest,
    ) -> std::result::Result<String, GenerationError> {
        let bad_request = |e: OpenAIError| GenerationError::provider(ErrorClass::BadRequest, e.to_string());

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system.clone())
                .build()
                .map_err(bad_request)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.clone())
                .build()
                .map_err(bad_request)?
                .into(),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(request.temperature)
            .build()
            .map_err(bad_request)?;

        let response = client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| GenerationError::provider(classify(&e), e.to_string()))?;

        let choice = response.choices.first().ok_or(GenerationError::EmptyResponse)?;
        if matches!(choice.finish_reason, Some(FinishReason::ContentFilter)) {
            return Err(GenerationError::provider(
                ErrorClass::Safety,
                "Response blocked by content filter",
            ));
        }

        let text = choice.message.content.as_deref().unwrap_or_default().trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    #[instrument(skip_all, fields(model = %self.model, chars = request.user.len()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let text = self
            .gateway
            .with_rotation(|credential| async move {
                let client = self.clients.get(&credential.id).ok_or_else(|| {
                    GenerationError::provider(ErrorClass::InvalidCredential, "No client for credential")
                })?;
                self.complete(client, request).await
            })
            .await?;

        debug!(chars = text.len(), "Generated completion");
        Ok(text)
    }
}

/// Map a client error onto an [`ErrorClass`].
pub(crate) fn classify(error: &OpenAIError) -> ErrorClass {
    match error {
        OpenAIError::ApiError(api) => {
            classify_api(api.code.as_deref(), api.r#type.as_deref(), &api.message)
        }
        OpenAIError::Reqwest(e) if e.is_timeout() => ErrorClass::Timeout,
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) if status.is_server_error() => ErrorClass::Server,
            Some(status) if status.as_u16() == 429 => ErrorClass::RateLimited,
            Some(status) if status.as_u16() == 401 => ErrorClass::InvalidCredential,
            Some(status) if status.as_u16() == 403 => ErrorClass::Forbidden,
            Some(status) if status.is_client_error() => ErrorClass::BadRequest,
            _ => ErrorClass::Network,
        },
        OpenAIError::InvalidArgument(_) => ErrorClass::BadRequest,
        _ => ErrorClass::Unknown,
    }
}

/// Classify an API error body by its `code`, `type` and message.
fn classify_api(code: Option<&str>, kind: Option<&str>, message: &str) -> ErrorClass {
    let message = message.to_lowercase();
    match (code, kind) {
        (Some("invalid_api_key"), _) | (_, Some("authentication_error")) => {
            ErrorClass::InvalidCredential
        }
        (Some("insufficient_quota"), _) | (_, Some("insufficient_quota")) => {
            ErrorClass::QuotaExhausted
        }
        (Some("rate_limit_exceeded"), _) | (_, Some("requests" | "tokens")) => {
            ErrorClass::RateLimited
        }
        (Some("content_filter" | "content_policy_violation"), _) => ErrorClass::Safety,
        (Some("unsupported_country_region_territory" | "model_not_found"), _)
        | (_, Some("permission_error")) => ErrorClass::Forbidden,
        (_, Some("server_error")) => ErrorClass::Server,
        _ if message.contains("incorrect api key") => ErrorClass::InvalidCredential,
        _ if message.contains("quota") => ErrorClass::QuotaExhausted,
        _ if message.contains("rate limit") => ErrorClass::RateLimited,
        _ if message.contains("overloaded") => ErrorClass::Server,
        (_, Some("invalid_request_error")) => ErrorClass::BadRequest,
        _ => ErrorClass::Unknown,
    }
}
