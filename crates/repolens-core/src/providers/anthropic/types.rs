use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::providers::shared::{ConversationMessage, image_mime_type};

// === API Request Types ===

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) max_tokens: u32,
    pub(crate) messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<Vec<SystemBlock>>,
    pub(crate) stream: bool,
}

/// System message block with optional cache control.
#[derive(Debug, Serialize)]
pub(crate) struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

impl SystemBlock {
    /// The project bundle lives in the system prompt, so it is the block
    /// worth caching across turns.
    pub(crate) fn with_cache_control(text: impl Into<String>) -> Self {
        Self {
            block_type: "text",
            text: text.into(),
            cache_control: Some(CacheControl::ephemeral()),
        }
    }
}

/// Cache control settings for prompt caching.
#[derive(Debug, Serialize)]
pub(crate) struct CacheControl {
    #[serde(rename = "type")]
    cache_type: &'static str,
}

impl CacheControl {
    pub(crate) fn ephemeral() -> Self {
        Self {
            cache_type: "ephemeral",
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiMessage {
    pub(crate) role: &'static str,
    pub(crate) content: ApiMessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ApiMessageContent {
    Text(String),
    Blocks(Vec<ApiContentBlock>),
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ApiImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: &'static str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiContentBlock {
    Image { source: ApiImageSource },
    Text { text: String },
}

impl ApiMessage {
    /// Plain text unless the turn carries images, in which case the images
    /// come first followed by the text block.
    pub(crate) fn from_conversation_message(msg: &ConversationMessage) -> Self {
        let content = if msg.images.is_empty() {
            ApiMessageContent::Text(msg.content.clone())
        } else {
            let mut blocks: Vec<ApiContentBlock> = msg
                .images
                .iter()
                .map(|bytes| ApiContentBlock::Image {
                    source: ApiImageSource {
                        source_type: "base64",
                        media_type: image_mime_type(bytes),
                        data: STANDARD.encode(bytes),
                    },
                })
                .collect();
            blocks.push(ApiContentBlock::Text {
                text: msg.content.clone(),
            });
            ApiMessageContent::Blocks(blocks)
        };

        ApiMessage {
            role: msg.role.as_str(),
            content,
        }
    }
}

// === API Response Types (non-streaming) ===

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    #[serde(default)]
    pub(crate) content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseBlock {
    #[serde(rename = "type")]
    pub(crate) block_type: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

impl MessagesResponse {
    pub(crate) fn into_text(self) -> String {
        self.content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("")
    }
}
