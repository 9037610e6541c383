//! Tracing subscriber setup.
//!
//! Logs go to stderr (filtered by `RUST_LOG`, default `repolens=info`) and
//! to a daily-rolling file in `$REPOLENS_HOME/logs`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "repolens=info,repolens_core=info";
const LOG_FILE_PREFIX: &str = "repolens.log";

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the life of the process. When the log directory cannot be created, only
/// the stderr layer is installed.
pub fn init(log_dir: &Path) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter());

    let (file_layer, guard) = if std::fs::create_dir_all(log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(env_filter());
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
