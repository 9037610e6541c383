//! Chat command handler.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use repolens_core::core::events::{RelayFrame, frame_channel};
use repolens_core::core::interrupt;
use repolens_core::core::project::{ProjectHandle, ProjectRuntime};
use repolens_core::core::relay::RelayState;
use repolens_core::error::CoreError;
use repolens_core::providers::ConversationMessage;

use super::keys::parse_provider;
use crate::cli::Interrupted;

pub struct ChatOptions<'a> {
    pub prompt: &'a str,
    pub provider: Option<&'a str>,
    pub model: Option<&'a str>,
    pub history: Option<&'a Path>,
    pub images: &'a [PathBuf],
    pub frames: bool,
}

fn load_history(path: &Path) -> Result<Vec<ConversationMessage>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read history {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("parse history {}", path.display()))
}

fn save_history(path: &Path, conversation: &[ConversationMessage]) -> Result<()> {
    let json = serde_json::to_string_pretty(conversation).context("serialize history")?;
    fs::write(path, json).with_context(|| format!("write history {}", path.display()))
}

fn read_images(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths
        .iter()
        .map(|path| fs::read(path).with_context(|| format!("read image {}", path.display())))
        .collect()
}

pub async fn run(
    runtime: &ProjectRuntime,
    project: &ProjectHandle,
    options: ChatOptions<'_>,
) -> Result<()> {
    let kind = options.provider.map(parse_provider).transpose()?;
    let client = runtime.provider_client(kind, options.model)?;

    let mut conversation = match options.history {
        Some(path) => load_history(path)?,
        None => Vec::new(),
    };
    let images = read_images(options.images)?;
    conversation.push(ConversationMessage::user(options.prompt).with_images(images));

    let (tx, mut rx) = frame_channel();
    let frames = options.frames;
    let printer = async move {
        let mut stdout = std::io::stdout();
        while let Some(frame) = rx.recv().await {
            if frames {
                match frame.encode() {
                    Ok(line) => print!("{line}"),
                    Err(e) => tracing::warn!("Failed to encode frame: {e}"),
                }
            } else if let RelayFrame::Content { content } = frame {
                print!("{content}");
            }
            if let Err(e) = stdout.flush() {
                tracing::debug!("stdout flush failed: {e}");
            }
        }
    };

    let cancel = interrupt::token();
    let (result, ()) = tokio::join!(
        runtime.chat(project, &client, &mut conversation, tx, &cancel),
        printer
    );

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(CoreError::Cancelled) => return Err(Interrupted.into()),
        Err(e) => return Err(e.into()),
    };

    if let Some(dynamic) = &outcome.dynamic {
        eprintln!("Dynamic context: {} files selected", dynamic.count());
        for rejected in &dynamic.rejected {
            eprintln!("  skipped {} ({})", rejected.path, rejected.reason);
        }
    }

    if outcome.relay.state == RelayState::Cancelled {
        return Err(Interrupted.into());
    }

    if options.frames {
        print!("{}", RelayFrame::history(&conversation).encode()?);
    } else {
        println!();
    }

    if let Some(path) = options.history {
        save_history(path, &conversation)?;
    }
    Ok(())
}
