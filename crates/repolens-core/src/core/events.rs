//! Frames of the internal UI streaming protocol.
//!
//! Each frame goes out as one `data: {json}` line followed by a blank line.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::providers::ConversationMessage;

/// One frame relayed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayFrame {
    /// Incremental assistant text.
    Content { content: String },

    /// Final conversation state, sent once after the stream ends.
    ConversationHistory {
        #[serde(rename = "conversationHistory")]
        conversation_history: Vec<ConversationMessage>,
    },
}

impl RelayFrame {
    pub fn content(text: impl Into<String>) -> Self {
        RelayFrame::Content {
            content: text.into(),
        }
    }

    pub fn history(conversation: &[ConversationMessage]) -> Self {
        RelayFrame::ConversationHistory {
            conversation_history: conversation.to_vec(),
        }
    }

    /// Renders the frame as a `data:` line plus the blank separator.
    ///
    /// # Errors
    /// Returns an error if the frame cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

/// Sender half for relay frames.
pub type FrameTx = mpsc::Sender<RelayFrame>;

/// Receiver half for relay frames.
pub type FrameRx = mpsc::Receiver<RelayFrame>;

/// Creates a bounded frame channel.
pub fn frame_channel() -> (FrameTx, FrameRx) {
    mpsc::channel(256)
}
