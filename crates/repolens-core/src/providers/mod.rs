//! LLM provider implementations.

pub mod anthropic;
pub mod openai;
pub mod shared;

pub use shared::{
    ConversationMessage, ProviderError, ProviderErrorKind, ProviderResult, ProviderStream, Role,
    StreamEvent, request_turns, resolve_api_key, resolve_base_url,
};

use crate::config::Config;
use anthropic::{AnthropicClient, AnthropicConfig};
use openai::{OpenAIChatCompletionsClient, OpenAIConfig};

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
}

impl ProviderKind {
    pub fn all() -> &'static [ProviderKind] {
        &[ProviderKind::Anthropic, ProviderKind::OpenAI]
    }

    /// Returns the string identifier used in config files and the key store.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAI => "openai",
        }
    }

    pub fn from_id(id: &str) -> Option<ProviderKind> {
        match id.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(ProviderKind::Anthropic),
            "openai" | "gpt" => Some(ProviderKind::OpenAI),
            _ => None,
        }
    }

    /// Human-readable label, also stamped on assistant messages.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "Claude",
            ProviderKind::OpenAI => "OpenAI",
        }
    }

    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAI => "OPENAI_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "claude-sonnet-4-5",
            ProviderKind::OpenAI => "gpt-4o",
        }
    }

    /// Instruction appended to the last user turn of every chat request.
    pub fn trailing_instruction(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => {
                "Answer using the project context in the system prompt. \
                 When you change a file, give its full absolute path followed by the complete new contents."
            }
            ProviderKind::OpenAI => {
                "Use the project context from the system message. \
                 When you change a file, state its full absolute path and put the complete new contents in a fenced code block."
            }
        }
    }

    /// Returns the turns to send upstream: drops a trailing pending
    /// assistant message and appends the trailing instruction to the last
    /// user turn.
    pub fn prepare_turns(&self, conversation: &[ConversationMessage]) -> Vec<ConversationMessage> {
        let mut turns = request_turns(conversation).to_vec();
        if let Some(last_user) = turns.iter_mut().rev().find(|m| m.role == Role::User) {
            last_user.content = format!(
                "{}\n\n{}",
                last_user.content.trim_end(),
                self.trailing_instruction()
            );
        }
        turns
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A configured client for one provider.
pub enum ProviderClient {
    Anthropic(AnthropicClient),
    OpenAI(OpenAIChatCompletionsClient),
}

impl ProviderClient {
    /// Builds a client from config, an optional model override and an
    /// optional key from the key store.
    ///
    /// # Errors
    /// Returns a `Config` error when credentials or endpoint are unusable.
    pub fn from_config(
        kind: ProviderKind,
        config: &Config,
        model_override: Option<&str>,
        stored_api_key: Option<&str>,
    ) -> ProviderResult<Self> {
        let provider_config = config.providers.get(kind);
        let model = model_override
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| provider_config.effective_model())
            .unwrap_or(kind.default_model())
            .to_string();

        match kind {
            ProviderKind::Anthropic => {
                let cfg = AnthropicConfig::resolve(
                    model,
                    config.max_tokens,
                    provider_config.effective_base_url(),
                    provider_config.effective_api_key(),
                    stored_api_key,
                )?;
                Ok(ProviderClient::Anthropic(AnthropicClient::new(cfg)?))
            }
            ProviderKind::OpenAI => {
                let cfg = OpenAIConfig::resolve(
                    model,
                    Some(config.max_tokens),
                    provider_config.effective_base_url(),
                    provider_config.effective_api_key(),
                    stored_api_key,
                )?;
                Ok(ProviderClient::OpenAI(OpenAIChatCompletionsClient::new(cfg)?))
            }
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderClient::Anthropic(_) => ProviderKind::Anthropic,
            ProviderClient::OpenAI(_) => ProviderKind::OpenAI,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderClient::Anthropic(client) => client.model(),
            ProviderClient::OpenAI(client) => client.model(),
        }
    }

    /// Opens a streaming request.
    ///
    /// # Errors
    /// Returns an error on network failure or a non-2xx response.
    pub async fn send_stream(
        &self,
        messages: &[ConversationMessage],
        system: Option<&str>,
    ) -> ProviderResult<ProviderStream> {
        match self {
            ProviderClient::Anthropic(client) => client.send_messages_stream(messages, system).await,
            ProviderClient::OpenAI(client) => client.send_messages_stream(messages, system).await,
        }
    }

    /// Sends a non-streaming request and returns the reply text.
    ///
    /// # Errors
    /// Returns an error on network failure, a non-2xx response, or an
    /// unparseable body.
    pub async fn complete(
        &self,
        messages: &[ConversationMessage],
        system: Option<&str>,
    ) -> ProviderResult<String> {
        match self {
            ProviderClient::Anthropic(client) => client.complete(messages, system).await,
            ProviderClient::OpenAI(client) => client.complete(messages, system).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id_accepts_aliases() {
        assert_eq!(ProviderKind::from_id("Claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_id("openai"), Some(ProviderKind::OpenAI));
        assert_eq!(ProviderKind::from_id("gemini"), None);
    }

    #[test]
    fn test_prepare_turns_appends_instruction_to_last_user_turn() {
        let conversation = vec![
            ConversationMessage::user("first"),
            ConversationMessage::user("second"),
            ConversationMessage::pending_assistant("Claude"),
        ];
        let turns = ProviderKind::Anthropic.prepare_turns(&conversation);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "first");
        assert!(turns[1].content.starts_with("second\n\n"));
        assert!(
            turns[1]
                .content
                .ends_with(ProviderKind::Anthropic.trailing_instruction())
        );
        // The caller's conversation is untouched.
        assert_eq!(conversation[1].content, "second");
    }
}
