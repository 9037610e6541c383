//! Error taxonomy for the context and execution runtime.
//!
//! Operations whose failure category matters to the caller return
//! `Result<T, CoreError>`. Application edges (CLI) wrap these in `anyhow`.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::providers::{ProviderError, ProviderErrorKind};

/// Error categories, mirrored into structured output for the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Scan,
    UpstreamApi,
    Worker,
    Restore,
    Execution,
    Io,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid_input"),
            ErrorKind::Scan => write!(f, "scan_error"),
            ErrorKind::UpstreamApi => write!(f, "upstream_api_error"),
            ErrorKind::Worker => write!(f, "worker_error"),
            ErrorKind::Restore => write!(f, "restore_error"),
            ErrorKind::Execution => write!(f, "execution_error"),
            ErrorKind::Io => write!(f, "io_error"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Structured runtime error.
#[derive(Debug)]
pub enum CoreError {
    /// Missing or malformed project handle / settings. Raised before any I/O.
    InvalidInput(String),
    /// Unreadable directory during traversal. Aborts that scan only.
    Scan { path: String, message: String },
    /// Non-2xx (or mid-stream error) from a provider. `status` is 0 for
    /// errors reported inside an otherwise successful stream.
    UpstreamApi { status: u16, body: String },
    /// Backup worker failure.
    Worker(String),
    /// Failure during restore.
    Restore(String),
    /// Spawn failure for a single command.
    Execution { command: String, message: String },
    /// Unexpected filesystem failure.
    Io { path: String, source: std::io::Error },
    /// The operation was aborted by its cancellation token.
    Cancelled,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Scan { .. } => ErrorKind::Scan,
            CoreError::UpstreamApi { .. } => ErrorKind::UpstreamApi,
            CoreError::Worker(_) => ErrorKind::Worker,
            CoreError::Restore(_) => ErrorKind::Restore,
            CoreError::Execution { .. } => ErrorKind::Execution,
            CoreError::Io { .. } => ErrorKind::Io,
            CoreError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        CoreError::InvalidInput(message.into())
    }

    pub fn io(path: &Path, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn scan(path: &Path, message: impl Into<String>) -> Self {
        CoreError::Scan {
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidInput(message) => write!(f, "Invalid input: {message}"),
            CoreError::Scan { path, message } => {
                write!(f, "Failed to scan {path}: {message}")
            }
            CoreError::UpstreamApi { status, body } if *status == 0 => {
                write!(f, "Upstream API error: {body}")
            }
            CoreError::UpstreamApi { status, body } => {
                write!(f, "Upstream API error (HTTP {status}): {body}")
            }
            CoreError::Worker(message) => write!(f, "Backup worker failed: {message}"),
            CoreError::Restore(message) => write!(f, "Restore failed: {message}"),
            CoreError::Execution { command, message } => {
                write!(f, "Error executing command \"{command}\": {message}")
            }
            CoreError::Io { path, source } => write!(f, "I/O error at {path}: {source}"),
            CoreError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::HttpStatus => CoreError::UpstreamApi {
                status: err.status.unwrap_or(0),
                body: err.details.unwrap_or(err.message),
            },
            ProviderErrorKind::Timeout
            | ProviderErrorKind::Parse
            | ProviderErrorKind::ApiError
            | ProviderErrorKind::Config => CoreError::UpstreamApi {
                status: err.status.unwrap_or(0),
                body: err.message,
            },
        }
    }
}

/// Result alias for runtime operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
