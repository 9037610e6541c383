//! Streaming relay: one chat turn from request to committed reply.
//!
//! The relay builds the provider request, opens the upstream stream and
//! forwards every text delta as a [`RelayFrame::Content`] frame in upstream
//! order. Cancellation is raced against every read.

use std::fmt;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::events::{FrameTx, RelayFrame};
use crate::error::{CoreError, CoreResult};
use crate::providers::{
    ConversationMessage, ProviderClient, ProviderErrorKind, ProviderStream, StreamEvent,
};

/// Lifecycle of one relayed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    BuildingRequest,
    AwaitingUpstream,
    Streaming,
    Complete,
    Cancelled,
    Error,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelayState::Complete | RelayState::Cancelled | RelayState::Error
        )
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::BuildingRequest => "building_request",
            RelayState::AwaitingUpstream => "awaiting_upstream",
            RelayState::Streaming => "streaming",
            RelayState::Complete => "complete",
            RelayState::Cancelled => "cancelled",
            RelayState::Error => "error",
        };
        f.write_str(name)
    }
}

/// How a relay ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// `Complete` or `Cancelled`
    pub state: RelayState,
    /// Committed reply text. Empty when cancelled.
    pub text: String,
    /// Number of content frames emitted
    pub deltas: usize,
}

struct Transitions {
    state: RelayState,
}

impl Transitions {
    fn new() -> Self {
        Self {
            state: RelayState::BuildingRequest,
        }
    }

    fn advance(&mut self, next: RelayState) {
        tracing::debug!(from = %self.state, to = %next, "relay state");
        self.state = next;
    }

    fn fail(&mut self, err: CoreError) -> CoreError {
        self.advance(RelayState::Error);
        tracing::warn!("Relay failed: {err}");
        err
    }
}

/// Relays one turn: streams the reply to `frames` and commits it to the
/// last assistant message of `conversation`.
///
/// An empty, incomplete assistant message labelled with the provider is
/// appended first unless the conversation already ends with one.
///
/// # Errors
/// `UpstreamApi` for a non-2xx response, a network failure or an `error`
/// event inside the stream. Cancellation is not an error; it yields an
/// outcome in the `Cancelled` state.
pub async fn relay(
    client: &ProviderClient,
    conversation: &mut Vec<ConversationMessage>,
    system_prompt: Option<&str>,
    frames: FrameTx,
    cancel: &CancellationToken,
) -> CoreResult<RelayOutcome> {
    let mut transitions = Transitions::new();
    let kind = client.kind();

    if !conversation
        .last()
        .is_some_and(ConversationMessage::is_pending_assistant)
    {
        conversation.push(ConversationMessage::pending_assistant(kind.label()));
    }
    let turns = kind.prepare_turns(conversation);

    transitions.advance(RelayState::AwaitingUpstream);
    tracing::info!(provider = %kind, model = client.model(), turns = turns.len(), "relaying chat turn");

    let stream = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            transitions.advance(RelayState::Cancelled);
            return Ok(cancelled(0));
        }
        result = client.send_stream(&turns, system_prompt) => {
            result.map_err(|e| transitions.fail(e.into()))?
        }
    };

    stream_into(conversation, stream, frames, cancel, &mut transitions).await
}

/// Consumes `stream`, forwarding deltas and committing the reply to the
/// last message of `conversation`.
async fn stream_into(
    conversation: &mut [ConversationMessage],
    mut stream: ProviderStream,
    frames: FrameTx,
    cancel: &CancellationToken,
    transitions: &mut Transitions,
) -> CoreResult<RelayOutcome> {
    transitions.advance(RelayState::Streaming);
    let mut text = String::new();
    let mut deltas = 0;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                transitions.advance(RelayState::Cancelled);
                tracing::info!(deltas, "relay cancelled; partial reply discarded");
                return Ok(cancelled(deltas));
            }
            event = stream.next() => event,
        };

        match event {
            None | Some(Ok(StreamEvent::MessageCompleted)) => break,
            Some(Ok(StreamEvent::TextDelta { text: delta, .. })) => {
                if delta.is_empty() {
                    continue;
                }
                text.push_str(&delta);
                deltas += 1;
                if frames.send(RelayFrame::content(delta)).await.is_err() {
                    tracing::debug!("frame receiver dropped");
                }
            }
            Some(Ok(StreamEvent::Error {
                error_type,
                message,
            })) => {
                return Err(transitions.fail(CoreError::UpstreamApi {
                    status: 0,
                    body: format!("{error_type}: {message}"),
                }));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) if e.kind == ProviderErrorKind::Parse => {
                tracing::warn!("Skipping malformed stream frame: {e}");
            }
            Some(Err(e)) => return Err(transitions.fail(e.into())),
        }
    }

    if let Some(last) = conversation.last_mut() {
        last.content.clone_from(&text);
        last.is_complete = true;
    }
    transitions.advance(RelayState::Complete);
    tracing::info!(deltas, chars = text.len(), "relay complete");

    Ok(RelayOutcome {
        state: RelayState::Complete,
        text,
        deltas,
    })
}

fn cancelled(deltas: usize) -> RelayOutcome {
    RelayOutcome {
        state: RelayState::Cancelled,
        text: String::new(),
        deltas,
    }
}
