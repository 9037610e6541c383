use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::providers::shared::{ProviderError, ProviderResult, StreamEvent, classify_stream_error};

/// SSE parser that converts an Anthropic byte stream into `StreamEvent`s.
pub struct SseParser<S> {
    inner: EventStream<S>,
}

impl<S> SseParser<S> {
    pub fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
        }
    }
}

impl<S, E> Stream for SseParser<S>
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

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                Poll::Ready(Some(parse_sse_event_fields(&event.event, &event.data)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(classify_stream_error(&e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn parse_data<T: DeserializeOwned>(event_type: &str, data: Option<&str>) -> ProviderResult<T> {
    let data = data.ok_or_else(|| {
        ProviderError::parse(format!("Missing data for {event_type}"))
    })?;
    serde_json::from_str(data)
        .map_err(|err| ProviderError::parse(format!("Failed to parse {event_type}: {err}")))
}

#[derive(Debug, Deserialize)]
struct SseEnvelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
}

/// The payload's `type` wins over the `event:` line, which is optional.
fn event_kind(event_name: &str, data: Option<&str>) -> String {
    data.and_then(|raw| serde_json::from_str::<SseEnvelope>(raw).ok())
        .and_then(|envelope| envelope.event_type)
        .unwrap_or_else(|| event_name.to_string())
}

fn parse_sse_event_fields(event_name: &str, data: &str) -> ProviderResult<StreamEvent> {
    let data = if data.trim().is_empty() {
        None
    } else {
        Some(data)
    };

    let kind = event_kind(event_name, data);
    let event_type = kind.as_str();
    match event_type {
        "ping" => Ok(StreamEvent::Ping),
        "message_start" => {
            let parsed: SseMessageStart = parse_data(event_type, data)?;
            Ok(StreamEvent::MessageStart {
                model: parsed.message.model,
            })
        }
        "content_block_start" => {
            let parsed: SseIndexed = parse_data(event_type, data)?;
            Ok(StreamEvent::ContentBlockStart {
                index: parsed.index,
            })
        }
        "content_block_delta" => {
            let parsed: SseContentBlockDelta = parse_data(event_type, data)?;
            match parsed.delta.delta_type.as_str() {
                "text_delta" => Ok(StreamEvent::TextDelta {
                    index: parsed.index,
                    text: parsed.delta.text.unwrap_or_default(),
                }),
                other => Err(ProviderError::parse(format!("Unsupported delta type: {other}"))),
            }
        }
        "content_block_stop" => {
            let parsed: SseIndexed = parse_data(event_type, data)?;
            Ok(StreamEvent::ContentBlockCompleted {
                index: parsed.index,
            })
        }
        "message_delta" => {
            let parsed: SseMessageDelta = parse_data(event_type, data)?;
            Ok(StreamEvent::MessageDelta {
                stop_reason: parsed.delta.stop_reason,
            })
        }
        "message_stop" => Ok(StreamEvent::MessageCompleted),
        "error" => {
            let parsed: SseError = parse_data(event_type, data)?;
            Ok(StreamEvent::Error {
                error_type: parsed.error.error_type,
                message: parsed.error.message,
            })
        }
        other => Err(ProviderError::parse(format!("Unknown SSE event type: {other}"))),
    }
}

// === SSE Response Structures ===

#[derive(Debug, Deserialize)]
struct SseMessageStart {
    message: SseMessageInfo,
}

#[derive(Debug, Deserialize)]
struct SseMessageInfo {
    model: String,
}

#[derive(Debug, Deserialize)]
struct SseIndexed {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct SseContentBlockDelta {
    index: usize,
    delta: SseDelta,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseMessageDelta {
    delta: SseMessageDeltaInner,
}

#[derive(Debug, Deserialize)]
struct SseMessageDeltaInner {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseError {
    error: SseErrorInfo,
}

#[derive(Debug, Deserialize)]
struct SseErrorInfo {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::providers::shared::ProviderErrorKind;

    const SSE_TEXT_RESPONSE: &str = r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_123","type":"message","role":"assistant","content":[],"model":"claude-sonnet-4-20250514","stop_reason":null,"usage":{"input_tokens":10,"output_tokens":1}}}

event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}

event: ping
data: {"type":"ping"}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}

event: content_block_stop
data: {"type":"content_block_stop","index":0}

event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn","stop_sequence":null},"usage":{"output_tokens":5}}

event: message_stop
data: {"type":"message_stop"}

"#;

    fn mock_byte_stream(
        data: &str,
        chunk_size: usize,
    ) -> impl Stream<Item = std::result::Result<bytes::Bytes, std::io::Error>> + Unpin {
        let chunks: Vec<_> = data
            .as_bytes()
            .chunks(chunk_size)
            .map(|c| Ok(bytes::Bytes::copy_from_slice(c)))
            .collect();
        futures_util::stream::iter(chunks)
    }

    async fn collect(data: &str, chunk_size: usize) -> Vec<ProviderResult<StreamEvent>> {
        SseParser::new(mock_byte_stream(data, chunk_size))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_sse_parser_text_response() {
        let events: Vec<StreamEvent> = collect(SSE_TEXT_RESPONSE, 50)
            .await
            .into_iter()
            .map(|r| r.expect("Expected valid event"))
            .collect();

        assert_eq!(events.len(), 8);
        assert!(
            matches!(&events[0], StreamEvent::MessageStart { model } if model == "claude-sonnet-4-20250514")
        );
        assert_eq!(events[1], StreamEvent::ContentBlockStart { index: 0 });
        assert_eq!(events[2], StreamEvent::Ping);
        assert_eq!(
            events[3],
            StreamEvent::TextDelta {
                index: 0,
                text: "Hel".to_string()
            }
        );
        assert_eq!(
            events[4],
            StreamEvent::TextDelta {
                index: 0,
                text: "lo".to_string()
            }
        );
        assert_eq!(events[5], StreamEvent::ContentBlockCompleted { index: 0 });
        assert_eq!(
            events[6],
            StreamEvent::MessageDelta {
                stop_reason: Some("end_turn".to_string())
            }
        );
        assert_eq!(events[7], StreamEvent::MessageCompleted);
    }

    #[tokio::test]
    async fn test_sse_parser_error_event() {
        let data = r#"event: error
data: {"type":"error","error":{"type":"overloaded_error","message":"API is temporarily overloaded"}}

"#;
        let events = collect(data, 16).await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::Error {
                error_type: "overloaded_error".to_string(),
                message: "API is temporarily overloaded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_sse_parser_handles_crlf_and_small_chunks() {
        let data = "event: ping\r\ndata: {\"type\":\"ping\"}\r\n\r\nevent: message_stop\r\ndata: {\"type\":\"message_stop\"}\r\n\r\n";
        let events: Vec<StreamEvent> = collect(data, 7)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(events, vec![StreamEvent::Ping, StreamEvent::MessageCompleted]);
    }

    #[tokio::test]
    async fn test_sse_parser_handles_utf8_split_across_chunks() {
        let data = r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello 👋 world"}}

"#;
        let bytes = data.as_bytes();
        let emoji_start = bytes
            .windows(4)
            .position(|w| w == [0xF0, 0x9F, 0x91, 0x8B])
            .expect("emoji not found");
        let split_point = emoji_start + 2;

        let chunks: Vec<std::result::Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::copy_from_slice(&bytes[..split_point])),
            Ok(bytes::Bytes::copy_from_slice(&bytes[split_point..])),
        ];
        let mut parser = SseParser::new(futures_util::stream::iter(chunks));

        let event = parser.next().await.unwrap().expect("should parse");
        assert_eq!(
            event,
            StreamEvent::TextDelta {
                index: 0,
                text: "Hello 👋 world".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_sse_parser_reports_unsupported_delta_as_parse_error() {
        let data = r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}

"#;
        let events = collect(data, 64).await;
        let err = events[0].as_ref().unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Parse);
    }

    #[tokio::test]
    async fn test_sse_parser_reads_kind_from_payload_without_event_lines() {
        let data = concat!(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let events: Vec<StreamEvent> = collect(data, 32)
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta {
                    index: 0,
                    text: "Hi".to_string()
                },
                StreamEvent::MessageCompleted
            ]
        );
    }

    #[tokio::test]
    async fn test_sse_parser_falls_back_to_event_name_for_untyped_payload() {
        let data = "event: ping\ndata: {}\n\n";
        let events = collect(data, 64).await;
        assert_eq!(events[0].as_ref().unwrap(), &StreamEvent::Ping);
    }
}
