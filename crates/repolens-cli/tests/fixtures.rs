//! SSE fixture helpers for integration tests.

#![allow(dead_code)]

use wiremock::ResponseTemplate;

pub const ANTHROPIC_TEXT: &str = include_str!("fixtures/anthropic_text.sse");
pub const OPENAI_TEXT: &str = include_str!("fixtures/openai_text.sse");

/// Anthropic Messages stream that delivers `first` then `second`.
pub fn anthropic_sse(first: &str, second: &str) -> String {
    ANTHROPIC_TEXT
        .replace("{{FIRST}}", &escape_json(first))
        .replace("{{SECOND}}", &escape_json(second))
}

/// Chat Completions stream that delivers `first` then `second`.
pub fn openai_sse(first: &str, second: &str) -> String {
    OPENAI_TEXT
        .replace("{{FIRST}}", &escape_json(first))
        .replace("{{SECOND}}", &escape_json(second))
}

/// Wrap SSE body string in a ResponseTemplate.
pub fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

/// Non-streaming Anthropic reply carrying `text`.
pub fn anthropic_json_response(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "msg_test",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn"
    }))
}

/// Escape special characters for JSON string embedding.
fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anthropic_sse_substitution() {
        let result = anthropic_sse("Hel", "lo \"x\"");
        assert!(result.contains(r#""text":"Hel""#));
        assert!(result.contains(r#""text":"lo \"x\"""#));
        assert!(result.contains("event: message_stop"));
    }

    #[test]
    fn test_openai_sse_substitution() {
        let result = openai_sse("a", "b");
        assert!(result.contains(r#""content":"a""#));
        assert!(result.trim_end().ends_with("data: [DONE]"));
    }
}
