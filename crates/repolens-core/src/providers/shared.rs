//! Provider-agnostic types shared across LLM backends.

use std::fmt;

use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard User-Agent header for repolens API requests.
pub const USER_AGENT: &str = concat!("repolens/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Config resolution helpers
// ============================================================================

/// Resolves an API key with precedence: config > key store > env.
///
/// # Errors
/// Returns a `Config` provider error when no source yields a non-empty key.
pub fn resolve_api_key(
    config_api_key: Option<&str>,
    stored_api_key: Option<&str>,
    env_var: &str,
    config_section: &str,
) -> ProviderResult<String> {
    for candidate in [config_api_key, stored_api_key].into_iter().flatten() {
        let trimmed = candidate.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    std::env::var(env_var)
        .ok()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::Config,
                format!(
                    "No API key available. Set {env_var}, run `repolens keys set {config_section} <KEY>`, \
                     or set api_key in [providers.{config_section}]."
                ),
            )
        })
}

/// Resolves a base URL with precedence: env > config > default.
///
/// # Errors
/// Returns a `Config` provider error if the chosen URL is malformed.
pub fn resolve_base_url(
    config_base_url: Option<&str>,
    env_var: &str,
    default_url: &str,
    provider_name: &str,
) -> ProviderResult<String> {
    if let Ok(env_url) = std::env::var(env_var) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, provider_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    if let Some(config_url) = config_base_url {
        let trimmed = config_url.trim();
        if !trimmed.is_empty() {
            validate_url(trimmed, provider_name)?;
            return Ok(trimmed.trim_end_matches('/').to_string());
        }
    }

    Ok(default_url.to_string())
}

fn validate_url(url: &str, provider_name: &str) -> ProviderResult<()> {
    url::Url::parse(url).map_err(|err| {
        ProviderError::new(
            ProviderErrorKind::Config,
            format!("Invalid {provider_name} base URL: {url} ({err})"),
        )
    })?;
    Ok(())
}

// ============================================================================
// Conversation model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a chat session.
///
/// Images are raw bytes in memory and base64 strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_blobs")]
    pub images: Vec<Vec<u8>>,
    #[serde(default = "default_complete")]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_label: Option<String>,
}

fn default_complete() -> bool {
    true
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
            is_complete: true,
            provider_label: None,
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<Vec<u8>>) -> Self {
        self.images = images;
        self
    }

    /// Creates an empty, incomplete assistant message to stream into.
    pub fn pending_assistant(provider_label: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            images: Vec::new(),
            is_complete: false,
            provider_label: Some(provider_label.into()),
        }
    }

    pub fn is_pending_assistant(&self) -> bool {
        self.role == Role::Assistant && !self.is_complete
    }
}

/// Returns the turns that should be sent upstream: everything except a
/// trailing in-progress assistant message.
pub fn request_turns(conversation: &[ConversationMessage]) -> &[ConversationMessage] {
    match conversation.last() {
        Some(last) if last.is_pending_assistant() => &conversation[..conversation.len() - 1],
        _ => conversation,
    }
}

/// Best-effort MIME sniffing for image blobs. Falls back to PNG.
pub fn image_mime_type(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| mime.starts_with("image/"))
        .unwrap_or("image/png")
}

mod base64_blobs {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(blobs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(blobs.iter().map(|blob| STANDARD.encode(blob)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Vec<String> = Vec::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|item| {
                // Accept data URLs as well as bare base64.
                let payload = item.split_once(";base64,").map_or(item.as_str(), |(_, d)| d);
                STANDARD.decode(payload).map_err(de::Error::custom)
            })
            .collect()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Categories of provider errors for consistent error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection timeout or request timeout
    Timeout,
    /// Failed to parse response (JSON parse error, invalid SSE, etc.)
    Parse,
    /// API-level error returned by the provider mid-stream
    ApiError,
    /// Missing credentials or malformed endpoint configuration
    Config,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::HttpStatus => write!(f, "http_status"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Parse => write!(f, "parse"),
            ProviderErrorKind::ApiError => write!(f, "api_error"),
            ProviderErrorKind::Config => write!(f, "config"),
        }
    }
}

/// Structured error from the provider with kind and details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Raw error body, when the provider returned one
    pub details: Option<String>,
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            status: None,
        }
    }

    /// Creates an HTTP status error, keeping the full body in `details`.
    pub fn http_status(status: u16, body: &str) -> Self {
        let mut message = format!("HTTP {status}");
        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(msg) = json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
        {
            message = format!("HTTP {status}: {msg}");
        }
        Self {
            kind: ProviderErrorKind::HttpStatus,
            message,
            details: (!body.is_empty()).then(|| body.to_string()),
            status: Some(status),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Creates an API error (from mid-stream error event).
    pub fn api_error(error_type: &str, message: &str) -> Self {
        Self::new(ProviderErrorKind::ApiError, format!("{error_type}: {message}"))
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Parse, message)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Result type for provider operations.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::timeout(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProviderError::timeout(format!("Connection failed: {e}"))
    } else {
        ProviderError::new(ProviderErrorKind::HttpStatus, format!("Network error: {e}"))
    }
}

/// Maps an SSE decoding failure. Transport failures end the stream; UTF-8
/// and framing problems only spoil the current frame.
pub(crate) fn classify_stream_error<E: std::fmt::Display>(
    e: &eventsource_stream::EventStreamError<E>,
) -> ProviderError {
    match e {
        eventsource_stream::EventStreamError::Transport(inner) => ProviderError::new(
            ProviderErrorKind::HttpStatus,
            format!("Stream interrupted: {inner}"),
        ),
        other => ProviderError::parse(format!("SSE stream error: {other}")),
    }
}

// ============================================================================
// Streaming
// ============================================================================

/// Events emitted by provider SSE parsers.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart { model: String },
    ContentBlockStart { index: usize },
    /// Incremental text for the assistant reply
    TextDelta { index: usize, text: String },
    ContentBlockCompleted { index: usize },
    MessageDelta { stop_reason: Option<String> },
    MessageCompleted,
    /// Keepalive
    Ping,
    /// Error event from the API
    Error { error_type: String, message: String },
}

/// Boxed stream of provider events.
pub type ProviderStream = BoxStream<'static, ProviderResult<StreamEvent>>;
