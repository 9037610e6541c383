//! Anthropic Messages API client.

use super::sse::SseParser;
use super::types::{ApiMessage, MessagesRequest, MessagesResponse, SystemBlock};
use crate::providers::shared::{
    ConversationMessage, ProviderError, ProviderErrorKind, ProviderResult, ProviderStream,
    USER_AGENT, classify_reqwest_error, resolve_api_key, resolve_base_url,
};

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

const API_VERSION: &str = "2023-06-01";

/// Configuration for the Anthropic client.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    /// Resolves credentials and endpoint.
    ///
    /// API key: `config_api_key` > `stored_api_key` > `ANTHROPIC_API_KEY`.
    /// Base URL: `ANTHROPIC_BASE_URL` > `config_base_url` > `https://api.anthropic.com`.
    ///
    /// # Errors
    /// Returns a `Config` error when no key is available or the URL is invalid.
    pub fn resolve(
        model: String,
        max_tokens: u32,
        config_base_url: Option<&str>,
        config_api_key: Option<&str>,
        stored_api_key: Option<&str>,
    ) -> ProviderResult<Self> {
        let api_key = resolve_api_key(
            config_api_key,
            stored_api_key,
            "ANTHROPIC_API_KEY",
            "anthropic",
        )?;
        let base_url = resolve_base_url(
            config_base_url,
            "ANTHROPIC_BASE_URL",
            DEFAULT_BASE_URL,
            "Anthropic",
        )?;

        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }
}

/// Anthropic API client.
pub struct AnthropicClient {
    config: AnthropicConfig,
    http: reqwest::Client,
}

impl AnthropicClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Refuses the production endpoint when `REPOLENS_BLOCK_REAL_API=1`, so
    /// test harnesses never reach the real API.
    pub fn new(config: AnthropicConfig) -> ProviderResult<Self> {
        if std::env::var("REPOLENS_BLOCK_REAL_API").is_ok_and(|v| v == "1")
            && config.base_url == DEFAULT_BASE_URL
        {
            return Err(ProviderError::new(
                ProviderErrorKind::Config,
                "REPOLENS_BLOCK_REAL_API=1 but the production Anthropic API was selected. \
                 Set ANTHROPIC_BASE_URL to a mock server.",
            ));
        }

        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request<'a>(
        &'a self,
        messages: &[ConversationMessage],
        system: Option<&str>,
        stream: bool,
    ) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages: messages
                .iter()
                .map(ApiMessage::from_conversation_message)
                .collect(),
            system: system
                .filter(|s| !s.trim().is_empty())
                .map(|s| vec![SystemBlock::with_cache_control(s)]),
            stream,
        }
    }

    async fn post(&self, request: &MessagesRequest<'_>) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("user-agent", USER_AGENT)
            .header("anthropic-version", API_VERSION)
            .header("x-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body));
        }
        Ok(response)
    }

    /// Sends the conversation and returns an async stream of events.
    ///
    /// # Errors
    /// Returns an error on network failure or a non-2xx response.
    pub async fn send_messages_stream(
        &self,
        messages: &[ConversationMessage],
        system: Option<&str>,
    ) -> ProviderResult<ProviderStream> {
        let request = self.build_request(messages, system, true);
        let response = self.post(&request).await?;
        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }

    /// Sends the conversation without streaming and returns the reply text.
    ///
    /// # Errors
    /// Returns an error on network failure, a non-2xx response, or an
    /// unparseable body.
    pub async fn complete(
        &self,
        messages: &[ConversationMessage],
        system: Option<&str>,
    ) -> ProviderResult<String> {
        let request = self.build_request(messages, system, false);
        let response = self.post(&request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::parse(format!("Failed to parse Anthropic response: {e}")))?;
        Ok(parsed.into_text())
    }
}
