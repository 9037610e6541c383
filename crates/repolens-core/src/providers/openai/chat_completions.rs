//! OpenAI Chat Completions client and SSE normalization.

use std::collections::VecDeque;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::providers::shared::{
    ConversationMessage, ProviderError, ProviderErrorKind, ProviderResult, ProviderStream,
    StreamEvent, USER_AGENT, classify_reqwest_error, classify_stream_error, image_mime_type,
    resolve_api_key, resolve_base_url,
};

/// Default base URL for the OpenAI API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// OpenAI chat completions configuration.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
}

impl OpenAIConfig {
    /// Resolves credentials and endpoint.
    ///
    /// API key: `config_api_key` > `stored_api_key` > `OPENAI_API_KEY`.
    /// Base URL: `OPENAI_BASE_URL` > `config_base_url` > `https://api.openai.com/v1`.
    ///
    /// # Errors
    /// Returns a `Config` error when no key is available or the URL is invalid.
    pub fn resolve(
        model: String,
        max_tokens: Option<u32>,
        config_base_url: Option<&str>,
        config_api_key: Option<&str>,
        stored_api_key: Option<&str>,
    ) -> ProviderResult<Self> {
        let api_key = resolve_api_key(config_api_key, stored_api_key, "OPENAI_API_KEY", "openai")?;
        let base_url =
            resolve_base_url(config_base_url, "OPENAI_BASE_URL", DEFAULT_BASE_URL, "OpenAI")?;
        Ok(Self {
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }
}

/// OpenAI chat completions client.
pub struct OpenAIChatCompletionsClient {
    config: OpenAIConfig,
    http: reqwest::Client,
}

impl OpenAIChatCompletionsClient {
    /// Creates a new client.
    ///
    /// # Errors
    /// Refuses the production endpoint when `REPOLENS_BLOCK_REAL_API=1`.
    pub fn new(config: OpenAIConfig) -> ProviderResult<Self> {
        if std::env::var("REPOLENS_BLOCK_REAL_API").is_ok_and(|v| v == "1")
            && config.base_url == DEFAULT_BASE_URL
        {
            return Err(ProviderError::new(
                ProviderErrorKind::Config,
                "REPOLENS_BLOCK_REAL_API=1 but the production OpenAI API was selected. \
                 Set OPENAI_BASE_URL to a mock server.",
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

    async fn post(&self, request: &ChatCompletionRequest) -> ProviderResult<reqwest::Response> {
        let url = format!("{}{}", self.config.base_url, CHAT_COMPLETIONS_PATH);
        let response = self
            .http
            .post(&url)
            .headers(build_headers(&self.config.api_key, request.stream))
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
        let request = ChatCompletionRequest::new(&self.config, messages, system, true);
        let response = self.post(&request).await?;
        Ok(Box::pin(ChatCompletionsSseParser::new(
            response.bytes_stream(),
            self.config.model.clone(),
        )))
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
        let request = ChatCompletionRequest::new(&self.config, messages, system, false);
        let response = self.post(&request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::parse(format!("Failed to parse OpenAI response: {e}")))?;

        value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::parse("OpenAI response has no message content"))
    }
}

fn build_headers(api_key: &str, stream: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert(
        "accept",
        if stream {
            HeaderValue::from_static("text/event-stream")
        } else {
            HeaderValue::from_static("application/json")
        },
    );
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: ChatMessageContent,
}

/// Either a simple string or an array of content parts.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatMessageContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlData },
}

#[derive(Debug, Serialize)]
struct ImageUrlData {
    url: String,
}

impl ChatCompletionRequest {
    fn new(
        config: &OpenAIConfig,
        messages: &[ConversationMessage],
        system: Option<&str>,
        stream: bool,
    ) -> Self {
        let mut out_messages = Vec::with_capacity(messages.len() + 1);

        if let Some(prompt) = system
            && !prompt.trim().is_empty()
        {
            out_messages.push(ChatCompletionMessage {
                role: "system",
                content: ChatMessageContent::Text(prompt.to_string()),
            });
        }

        for msg in messages {
            let content = if msg.images.is_empty() {
                ChatMessageContent::Text(msg.content.clone())
            } else {
                let mut parts = vec![ChatContentPart::Text {
                    text: msg.content.clone(),
                }];
                parts.extend(msg.images.iter().map(|bytes| ChatContentPart::ImageUrl {
                    image_url: ImageUrlData {
                        url: format!(
                            "data:{};base64,{}",
                            image_mime_type(bytes),
                            STANDARD.encode(bytes)
                        ),
                    },
                }));
                ChatMessageContent::Parts(parts)
            };
            out_messages.push(ChatCompletionMessage {
                role: msg.role.as_str(),
                content,
            });
        }

        Self {
            model: config.model.clone(),
            stream,
            messages: out_messages,
            max_tokens: config.max_tokens,
        }
    }
}

/// Appends a blank line when the body ends so a final event without its
/// trailing separator is still dispatched.
struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
{
    type Item = std::result::Result<bytes::Bytes, E>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(bytes::Bytes::from_static(b"\n\n"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// SSE parser for OpenAI chat completions.
///
/// Emits the same event vocabulary as the Anthropic parser so the relay
/// can treat both providers alike.
pub struct ChatCompletionsSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    model: String,
    pending: VecDeque<StreamEvent>,
    started: bool,
    text_open: bool,
    finish_reason: Option<String>,
    emitted_done: bool,
}

impl<S> ChatCompletionsSseParser<S> {
    pub fn new<E>(stream: S, model: String) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            model,
            pending: VecDeque::new(),
            started: false,
            text_open: false,
            finish_reason: None,
            emitted_done: false,
        }
    }

    fn ensure_started(&mut self) {
        if !self.started {
            self.started = true;
            self.pending.push_back(StreamEvent::MessageStart {
                model: self.model.clone(),
            });
        }
    }

    fn emit_completion(&mut self) {
        if self.emitted_done {
            return;
        }
        self.emitted_done = true;
        self.ensure_started();

        if self.text_open {
            self.text_open = false;
            self.pending
                .push_back(StreamEvent::ContentBlockCompleted { index: 0 });
        }

        let stop_reason = self
            .finish_reason
            .take()
            .map_or_else(|| "stop".to_string(), |r| map_finish_reason(&r));
        self.pending.push_back(StreamEvent::MessageDelta {
            stop_reason: Some(stop_reason),
        });
        self.pending.push_back(StreamEvent::MessageCompleted);
    }

    fn handle_event_data(&mut self, data: &str) -> ProviderResult<()> {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        if trimmed == "[DONE]" {
            self.emit_completion();
            return Ok(());
        }

        let value = serde_json::from_str::<Value>(trimmed)
            .map_err(|err| ProviderError::parse(format!("Failed to parse SSE JSON: {err}")))?;
        self.handle_chunk(&value);
        Ok(())
    }

    fn handle_chunk(&mut self, value: &Value) {
        if let Some(error) = value.get("error") {
            let error_type = error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            self.pending.push_back(StreamEvent::Error {
                error_type,
                message,
            });
            // Terminal: no completion events follow an error.
            self.emitted_done = true;
            return;
        }

        self.ensure_started();

        let Some(choice) = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
        else {
            return;
        };

        if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
            if !self.text_open {
                self.text_open = true;
                self.pending
                    .push_back(StreamEvent::ContentBlockStart { index: 0 });
            }
            if !text.is_empty() {
                self.pending.push_back(StreamEvent::TextDelta {
                    index: 0,
                    text: text.to_string(),
                });
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
    }
}

impl<S, E> Stream for ChatCompletionsSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<StreamEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Err(err) = self.handle_event_data(&event.data) {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(classify_stream_error(&e))));
                }
                Poll::Ready(None) => {
                    // Body ended without [DONE]; still close the message.
                    self.emit_completion();
                    if let Some(event) = self.pending.pop_front() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "content_filter" => "error".to_string(),
        other => other.to_string(),
    }
}
