//! Dynamic context: ask the model which files matter, then rebuild the
//! content artifact from just those files.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::append_file_section;
use crate::error::{CoreError, CoreResult};
use crate::prompts;
use crate::providers::{ConversationMessage, ProviderClient};
use crate::sandbox::{BundleStore, ContextSettings, normalize};

/// Absolute POSIX, UNC-ish or drive-letter path with no whitespace.
fn absolute_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[/\\]|[A-Za-z]:[/\\])\S+$").expect("absolute path regex is valid")
    })
}

/// List bullets a model tends to add: `-`, `*`, `+`, `1.`, `1)`.
fn bullet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[-*+]|\d+[.)])\s+").expect("bullet regex is valid"))
}

/// Extracts absolute paths from a free-text reply, one candidate per line.
///
/// Lines are trimmed and stripped of list bullets and backticks; anything
/// that is not a single absolute path token is discarded. Duplicates are
/// dropped, first occurrence wins.
pub fn extract_paths(reply: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for line in reply.lines() {
        let trimmed = line.trim();
        let unbulleted = bullet_regex().replace(trimmed, "");
        let candidate = unbulleted.trim().trim_matches('`').trim();

        if absolute_path_regex().is_match(candidate) && seen.insert(candidate.to_string()) {
            paths.push(candidate.to_string());
        }
    }

    paths
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    OutsideProject,
    FilteredBySettings,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::OutsideProject => write!(f, "outside the project directory"),
            RejectReason::FilteredBySettings => write!(f, "excluded by context settings"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedPath {
    pub path: String,
    pub reason: RejectReason,
}

/// Outcome of one dynamic narrowing step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicContextResult {
    /// Paths loaded into the content artifact, in reply order
    pub accepted: Vec<PathBuf>,
    pub rejected: Vec<RejectedPath>,
}

impl DynamicContextResult {
    pub fn count(&self) -> usize {
        self.accepted.len()
    }
}

/// Splits candidates into those inside `root` that pass `settings` and
/// the rest.
pub fn validate(
    candidates: &[String],
    root: &Path,
    settings: &ContextSettings,
) -> DynamicContextResult {
    let root = normalize(root);
    let extensions = settings.extension_filter();
    let mut result = DynamicContextResult::default();

    for candidate in candidates {
        let path = normalize(Path::new(candidate));
        let reason = if !path.starts_with(&root) || path == root {
            Some(RejectReason::OutsideProject)
        } else if !settings.admits(&root, &path, &extensions) {
            Some(RejectReason::FilteredBySettings)
        } else {
            None
        };

        match reason {
            Some(reason) => result.rejected.push(RejectedPath {
                path: candidate.clone(),
                reason,
            }),
            None => result.accepted.push(path),
        }
    }

    result
}

/// Renders a content artifact containing only `paths`.
pub fn build_content(paths: &[PathBuf]) -> String {
    let mut content = String::new();
    for path in paths {
        append_file_section(&mut content, path);
    }
    content
}

/// Runs the narrowing round trip against `client` and replaces the content
/// artifact in `store`. The structure artifact is left untouched.
///
/// # Errors
/// `UpstreamApi` when the model call fails (no fallback to a full scan),
/// `Cancelled` when `cancel` fires first, `Io` if the artifact cannot be
/// written.
pub async fn narrow(
    client: &ProviderClient,
    conversation: &[ConversationMessage],
    system_prompt: &str,
    root: &Path,
    settings: &ContextSettings,
    store: &BundleStore,
    cancel: &CancellationToken,
) -> CoreResult<DynamicContextResult> {
    let mut turns = client.kind().prepare_turns(conversation);
    match turns.last_mut() {
        Some(last) if last.role == crate::providers::Role::User => {
            last.content.push_str("\n\n");
            last.content.push_str(prompts::DYNAMIC_CONTEXT_DIRECTIVE);
        }
        _ => turns.push(ConversationMessage::user(prompts::DYNAMIC_CONTEXT_DIRECTIVE)),
    }

    tracing::info!(provider = %client.kind(), model = client.model(), "requesting relevant files");

    let reply = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(CoreError::Cancelled),
        reply = client.complete(&turns, Some(system_prompt)) => reply?,
    };

    let candidates = extract_paths(&reply);
    let result = validate(&candidates, root, settings);
    for rejected in &result.rejected {
        tracing::warn!(path = %rejected.path, reason = %rejected.reason, "ignoring suggested path");
    }

    store.write_content(&build_content(&result.accepted))?;
    tracing::info!(accepted = result.count(), rejected = result.rejected.len(), "dynamic context applied");

    Ok(result)
}
