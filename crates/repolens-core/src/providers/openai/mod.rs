//! OpenAI Chat Completions provider.

pub mod chat_completions;

pub use chat_completions::{
    ChatCompletionsSseParser, DEFAULT_BASE_URL, OpenAIChatCompletionsClient, OpenAIConfig,
};
