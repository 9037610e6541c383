//! Core module: UI-agnostic runtime.
//!
//! This module contains:
//! - `events`: Relay frames of the internal UI protocol
//! - `interrupt`: Ctrl+C wiring onto a shared cancellation token
//! - `project`: Project handles and the per-project runtime
//! - `relay`: Provider stream normalization and commit

pub mod events;
pub mod interrupt;
pub mod project;
pub mod relay;

pub use events::{FrameRx, FrameTx, RelayFrame, frame_channel};
pub use project::{ChatOutcome, ProjectHandle, ProjectRuntime};
pub use relay::{RelayOutcome, RelayState, relay};
