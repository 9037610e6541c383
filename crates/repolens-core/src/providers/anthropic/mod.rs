//! Anthropic Claude Messages API provider.
//!
//! The system prompt carries the whole project bundle, so it is sent as a
//! single cached system block. Conversation turns are not cached.

pub mod api;
mod sse;
pub(crate) mod types;

pub use api::{AnthropicClient, AnthropicConfig, DEFAULT_BASE_URL};
pub use sse::SseParser;
