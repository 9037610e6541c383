//! Deterministic mapping from a project path to its sandbox directories.
//!
//! Layout under the sandbox root:
//!
//! ```text
//! <root>/<id>-files/      context bundle artifacts
//! <root>/<id>-backups/    backup slot
//! <root>/<id>-settings/   per-project settings
//! <root>/internals/       shared across projects
//! ```

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Maximum length of an encoded id, in characters.
pub const MAX_ID_LEN: usize = 255;

/// Hex characters of the path hash appended to namespace ids.
const HASH_HEX_LEN: usize = 16;

const INTERNALS_DIR: &str = "internals";

/// The four storage areas of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxKind {
    Files,
    Backups,
    Settings,
    /// Shared by every project.
    Internals,
}

impl SandboxKind {
    pub fn all() -> &'static [SandboxKind] {
        &[
            SandboxKind::Files,
            SandboxKind::Backups,
            SandboxKind::Settings,
            SandboxKind::Internals,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SandboxKind::Files => "files",
            SandboxKind::Backups => "backups",
            SandboxKind::Settings => "settings",
            SandboxKind::Internals => "internals",
        }
    }
}

impl fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Encodes the final path segment as a filesystem-safe identifier.
///
/// Characters outside `[A-Za-z0-9_.-]` become `_`, a leading character that
/// is not a letter or underscore gets a `_` prefix, and the result is
/// truncated to [`MAX_ID_LEN`] characters. Pure: never touches the disk.
pub fn encode(path: &Path) -> String {
    let segment = normalize(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    encode_segment(&segment, MAX_ID_LEN)
}

fn encode_segment(segment: &str, max_len: usize) -> String {
    let mut id: String = segment
        .chars()
        .map(|c| if is_allowed(c) { c } else { '_' })
        .collect();

    let starts_ok = id
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        id.insert(0, '_');
    }

    // Only ASCII remains, so byte truncation is char truncation.
    id.truncate(max_len);
    id
}

/// Lexically normalizes a path: resolves `.` and `..`, drops trailing
/// separators. No filesystem access, symlinks are not resolved.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns the collision-free id used on disk: the encoded basename
/// (shortened to fit) plus `-` and 16 hex chars of SHA-256 of the
/// normalized full path.
pub fn namespace_id(path: &Path) -> String {
    let normalized = normalize(path);
    let base_len = MAX_ID_LEN - HASH_HEX_LEN - 1;
    let segment = normalized
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = encode_segment(&segment, base_len);

    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hash: String = digest
        .iter()
        .take(HASH_HEX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();

    format!("{base}-{hash}")
}

/// Resolves one storage area for a project.
pub fn resolve(sandbox_root: &Path, project: &Path, kind: SandboxKind) -> PathBuf {
    match kind {
        SandboxKind::Internals => sandbox_root.join(INTERNALS_DIR),
        other => sandbox_root.join(format!("{}-{}", namespace_id(project), other)),
    }
}

/// A project's namespace under one sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    sandbox_root: PathBuf,
    id: String,
}

impl Namespace {
    pub fn new(sandbox_root: impl Into<PathBuf>, project: &Path) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            id: namespace_id(project),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    pub fn path(&self, kind: SandboxKind) -> PathBuf {
        match kind {
            SandboxKind::Internals => self.sandbox_root.join(INTERNALS_DIR),
            other => self.sandbox_root.join(format!("{}-{}", self.id, other)),
        }
    }

    /// Directories private to this project (everything but `internals`).
    pub fn owned_dirs(&self) -> Vec<PathBuf> {
        [SandboxKind::Files, SandboxKind::Backups, SandboxKind::Settings]
            .into_iter()
            .map(|kind| self.path(kind))
            .collect()
    }

    /// Creates all four directories. Idempotent.
    ///
    /// # Errors
    /// Returns `Io` if a directory cannot be created.
    pub fn ensure(&self) -> CoreResult<()> {
        for kind in SandboxKind::all() {
            let dir = self.path(*kind);
            fs::create_dir_all(&dir).map_err(|e| CoreError::io(&dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn assert_valid_id(id: &str) {
        assert!(!id.is_empty());
        assert!(id.chars().count() <= MAX_ID_LEN, "too long: {}", id.len());
        assert!(id.chars().all(is_allowed), "bad char in {id}");
        let first = id.chars().next().unwrap();
        assert!(first.is_ascii_alphabetic() || first == '_', "bad first char in {id}");
    }

    #[test]
    fn test_encode_replaces_disallowed_chars() {
        assert_eq!(encode(Path::new("/home/me/my project!")), "my_project_");
        assert_eq!(encode(Path::new("/srv/app.v2-beta")), "app.v2-beta");
    }

    #[test]
    fn test_encode_prefixes_invalid_first_char() {
        assert_eq!(encode(Path::new("/x/2024-report")), "_2024-report");
        assert_eq!(encode(Path::new("/x/.hidden")), "_.hidden");
        assert_eq!(encode(Path::new("/x/_private")), "_private");
        assert_eq!(encode(Path::new("/")), "_");
    }

    #[test]
    fn test_encode_truncates_to_max_len() {
        let long = format!("/x/{}", "a".repeat(400));
        assert_eq!(encode(Path::new(&long)).len(), MAX_ID_LEN);
    }

    #[test]
    fn test_namespace_id_is_deterministic_and_valid() {
        let inputs = [
            "/home/me/project",
            "/home/me/9lives",
            "/tmp/ünïcödé dir",
            "/",
        ];
        for input in inputs {
            let a = namespace_id(Path::new(input));
            let b = namespace_id(Path::new(input));
            assert_eq!(a, b);
            assert_valid_id(&a);
        }

        let long = format!("/x/{}", "b".repeat(600));
        let id = namespace_id(Path::new(&long));
        assert_valid_id(&id);
        assert_eq!(id.len(), MAX_ID_LEN);
    }

    #[test]
    fn test_namespace_id_distinguishes_equal_basenames() {
        let a = namespace_id(Path::new("/work/a/app"));
        let b = namespace_id(Path::new("/work/b/app"));
        assert_ne!(a, b);
        assert!(a.starts_with("app-"));
        assert!(b.starts_with("app-"));
    }

    #[test]
    fn test_namespace_id_normalizes_lexically() {
        let canonical = namespace_id(Path::new("/work/app"));
        assert_eq!(namespace_id(Path::new("/work/app/")), canonical);
        assert_eq!(namespace_id(Path::new("/work/./app")), canonical);
        assert_eq!(namespace_id(Path::new("/work/other/../app")), canonical);
    }

    #[test]
    fn test_resolve_layout() {
        let root = Path::new("/sandbox");
        let project = Path::new("/work/app");
        let id = namespace_id(project);

        assert_eq!(
            resolve(root, project, SandboxKind::Files),
            root.join(format!("{id}-files"))
        );
        assert_eq!(
            resolve(root, project, SandboxKind::Settings),
            root.join(format!("{id}-settings"))
        );
        assert_eq!(
            resolve(root, project, SandboxKind::Internals),
            root.join("internals")
        );
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempdir().unwrap();
        let ns = Namespace::new(dir.path(), Path::new("/work/app"));

        ns.ensure().unwrap();
        ns.ensure().unwrap();

        for kind in SandboxKind::all() {
            assert!(ns.path(*kind).is_dir(), "{kind} missing");
        }
        assert_eq!(ns.owned_dirs().len(), 3);
    }
}
