//! Sequential shell command execution with line-by-line output streaming.
//!
//! Output lines sent to the caller:
//!
//! ```text
//! STDOUT: <line>
//! STDERR: <line>
//! Command "<cmd>" exited with code <n>
//! Command "<cmd>" cancelled
//! ```

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

/// How one command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit status; `-1` when killed by a signal.
    Exited(i32),
    SpawnFailed(String),
    Cancelled,
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Exited(code) => write!(f, "exit {code}"),
            CommandOutcome::SpawnFailed(message) => write!(f, "spawn failed: {message}"),
            CommandOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub outcome: CommandOutcome,
}

/// Per-command results in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub results: Vec<CommandResult>,
}

impl BatchReport {
    pub fn was_cancelled(&self) -> bool {
        self.results
            .last()
            .is_some_and(|r| r.outcome == CommandOutcome::Cancelled)
    }

    /// True when every command ran and exited with 0.
    pub fn all_succeeded(&self) -> bool {
        self.results
            .iter()
            .all(|r| r.outcome == CommandOutcome::Exited(0))
    }
}

/// Splits newline-separated input into commands, dropping blank lines.
pub fn parse_commands(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runs `commands` one after another in `cwd`, regardless of exit status.
///
/// A command that fails to spawn is reported inline and skipped. On
/// cancellation the running child is killed and the rest of the batch is
/// abandoned.
pub async fn run_batch(
    commands: &[String],
    cwd: &Path,
    output: mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> BatchReport {
    let mut report = BatchReport::default();

    for command in commands {
        if cancel.is_cancelled() {
            break;
        }
        tracing::info!(command = %command, cwd = %cwd.display(), "running command");
        let outcome = run_one(command, cwd, &output, cancel).await;
        let cancelled = outcome == CommandOutcome::Cancelled;
        report.results.push(CommandResult {
            command: command.clone(),
            outcome,
        });
        if cancelled {
            break;
        }
    }

    report
}

async fn emit(output: &mpsc::Sender<String>, line: String) {
    if output.send(line).await.is_err() {
        tracing::debug!("command output receiver dropped");
    }
}

async fn run_one(
    command: &str,
    cwd: &Path,
    output: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> CommandOutcome {
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let err = CoreError::Execution {
                command: command.to_string(),
                message: e.to_string(),
            };
            tracing::warn!("{err}");
            emit(output, err.to_string()).await;
            return CommandOutcome::SpawnFailed(e.to_string());
        }
    };

    if stream_output(&mut child, output, cancel).await.is_err() {
        return cancel_child(command, &mut child, output).await;
    }

    let status = tokio::select! {
        biased;
        () = cancel.cancelled() => return cancel_child(command, &mut child, output).await,
        status = child.wait() => status,
    };
    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            tracing::warn!("Failed to wait for \"{command}\": {e}");
            -1
        }
    };

    emit(output, format!("Command \"{command}\" exited with code {code}")).await;
    CommandOutcome::Exited(code)
}

struct Interrupted;

/// Forwards stdout and stderr lines until both pipes close.
async fn stream_output(
    child: &mut Child,
    output: &mpsc::Sender<String>,
    cancel: &CancellationToken,
) -> Result<(), Interrupted> {
    let mut stdout = child.stdout.take().map(BufReader::new);
    let mut stderr = child.stderr.take().map(BufReader::new);
    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Interrupted),
            line = read_raw_line(stdout.as_mut(), &mut stdout_buf), if stdout.is_some() => {
                match line {
                    Some(line) => emit(output, format!("STDOUT: {line}")).await,
                    None => stdout = None,
                }
            }
            line = read_raw_line(stderr.as_mut(), &mut stderr_buf), if stderr.is_some() => {
                match line {
                    Some(line) => emit(output, format!("STDERR: {line}")).await,
                    None => stderr = None,
                }
            }
        }
    }

    Ok(())
}

/// Reads one line as raw bytes and decodes it lossily, so output that is
/// not UTF-8 never ends the stream. `None` at end of stream.
///
/// Partial reads stay in `buf` when the caller's `select!` drops this
/// future, and the next call continues from them.
async fn read_raw_line<R>(reader: Option<&mut R>, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let reader = reader?;
    match reader.read_until(b'\n', buf).await {
        Ok(0) if buf.is_empty() => None,
        Ok(_) => {
            let line = decode_line(buf);
            buf.clear();
            Some(line)
        }
        Err(e) => {
            tracing::debug!("Failed to read command output: {e}");
            None
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    String::from_utf8_lossy(trimmed).into_owned()
}

async fn cancel_child(
    command: &str,
    child: &mut Child,
    output: &mpsc::Sender<String>,
) -> CommandOutcome {
    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill \"{command}\": {e}");
    }
    emit(output, format!("Command \"{command}\" cancelled")).await;
    CommandOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    async fn run(commands: &[&str], cwd: &Path) -> (BatchReport, Vec<String>) {
        let commands: Vec<String> = commands.iter().map(ToString::to_string).collect();
        let (tx, mut rx) = mpsc::channel(64);
        let report = run_batch(&commands, cwd, tx, &CancellationToken::new()).await;
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        (report, lines)
    }

    #[test]
    fn test_parse_commands_drops_blank_lines() {
        assert_eq!(
            parse_commands("ls\n\n   \n  echo hi  \n"),
            vec!["ls".to_string(), "echo hi".to_string()]
        );
    }

    #[tokio::test]
    async fn test_runs_sequentially_regardless_of_exit_status() {
        let temp = TempDir::new().unwrap();
        let (report, lines) = run(&["exit 1", "echo ok"], temp.path()).await;

        assert_eq!(
            lines,
            vec![
                "Command \"exit 1\" exited with code 1".to_string(),
                "STDOUT: ok".to_string(),
                "Command \"echo ok\" exited with code 0".to_string(),
            ]
        );
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].outcome, CommandOutcome::Exited(1));
        assert_eq!(report.results[1].outcome, CommandOutcome::Exited(0));
        assert!(!report.all_succeeded());
    }

    #[tokio::test]
    async fn test_stderr_is_tagged() {
        let temp = TempDir::new().unwrap();
        let (_, lines) = run(&["echo oops >&2"], temp.path()).await;
        assert_eq!(lines[0], "STDERR: oops");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_output() {
        let temp = TempDir::new().unwrap();
        let (report, lines) = run(
            &["printf 'bad \\377\\n'; echo after; exit 4"],
            temp.path(),
        )
        .await;

        assert_eq!(lines[0], "STDOUT: bad \u{FFFD}");
        assert_eq!(lines[1], "STDOUT: after");
        assert_eq!(report.results[0].outcome, CommandOutcome::Exited(4));
    }

    #[test]
    fn test_decode_line_strips_line_endings() {
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\xff\n"), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_runs_in_project_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "x").unwrap();
        let (report, lines) = run(&["ls"], temp.path()).await;
        assert!(lines.contains(&"STDOUT: marker.txt".to_string()));
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_and_batch_continues() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("gone");
        let commands = vec!["echo never".to_string()];
        let (tx, mut rx) = mpsc::channel(64);

        let report = run_batch(&commands, &missing, tx, &CancellationToken::new()).await;
        let first = rx.recv().await.unwrap();
        assert!(first.starts_with("Error executing command \"echo never\""));
        assert!(matches!(
            report.results[0].outcome,
            CommandOutcome::SpawnFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_kills_child_and_abandons_batch() {
        let temp = TempDir::new().unwrap();
        let commands = vec!["echo start; sleep 30".to_string(), "echo after".to_string()];
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let batch = run_batch(&commands, temp.path(), tx, &cancel);
        let watcher = async {
            let first = rx.recv().await;
            cancel.cancel();
            let mut rest = Vec::new();
            while let Some(line) = rx.recv().await {
                rest.push(line);
            }
            (first, rest)
        };
        let (report, (first, rest)) = tokio::time::timeout(Duration::from_secs(10), async {
            tokio::join!(batch, watcher)
        })
        .await
        .unwrap();

        assert_eq!(first.as_deref(), Some("STDOUT: start"));
        assert_eq!(rest, vec!["Command \"echo start; sleep 30\" cancelled".to_string()]);
        assert_eq!(report.results.len(), 1);
        assert!(report.was_cancelled());
    }
}
