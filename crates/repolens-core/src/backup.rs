//! Single-slot project backups and staged restore.
//!
//! A backup copies the project tree on a dedicated OS thread into a staging
//! slot beside `latest_backup`, then swaps it in. Restore copies the slot
//! next to the project and swaps directories by rename, rolling back if the
//! swap fails halfway. When the project cannot be staged beside or renamed
//! (a mount point, a read-only parent) restore wipes the project in place
//! and copies the slot back into it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, oneshot};

use crate::error::{CoreError, CoreResult};
use crate::sandbox::{Namespace, SandboxKind, normalize};

/// Name of the one backup slot in a project's backups area.
pub const BACKUP_SLOT: &str = "latest_backup";
const MANIFEST_FILE: &str = "latest_backup.json";

/// Counts from one tree copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupReport {
    pub files_copied: u64,
    pub dirs_created: u64,
    pub bytes_copied: u64,
}

/// Written next to the slot once a backup completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub created_at: String,
    pub project: String,
    pub report: BackupReport,
}

impl BackupManifest {
    pub fn load(namespace: &Namespace) -> Option<Self> {
        let path = namespace.path(SandboxKind::Backups).join(MANIFEST_FILE);
        let contents = fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

/// A backup running on its worker thread.
#[derive(Debug)]
pub struct BackupHandle {
    slot: PathBuf,
    rx: oneshot::Receiver<CoreResult<BackupReport>>,
}

impl BackupHandle {
    pub fn slot(&self) -> &Path {
        &self.slot
    }

    /// Waits for the worker to finish.
    ///
    /// # Errors
    /// `Worker` if the copy failed or the worker died without reporting.
    pub async fn wait(self) -> CoreResult<BackupReport> {
        self.rx.await.map_err(|e| {
            CoreError::Worker(format!("backup worker exited without reporting: {e}"))
        })?
    }
}

/// Starts a backup of `project_root` and returns immediately.
///
/// `lock` is held by the worker until the copy finishes, so other
/// operations on the same project wait for it.
///
/// # Errors
/// `Worker` if the thread cannot be spawned.
pub fn start_backup(
    project_root: &Path,
    namespace: &Namespace,
    lock: Option<OwnedMutexGuard<()>>,
) -> CoreResult<BackupHandle> {
    let project = normalize(project_root);
    let backups_dir = namespace.path(SandboxKind::Backups);
    let slot = backups_dir.join(BACKUP_SLOT);

    let mut skip = namespace.owned_dirs();
    skip.push(namespace.sandbox_root().to_path_buf());
    let skip: Vec<PathBuf> = skip.iter().map(|p| normalize(p)).collect();

    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("repolens-backup".to_string())
        .spawn(move || {
            let _lock = lock;
            let result = run_backup(&project, &backups_dir, &skip).map_err(|e| {
                tracing::error!("Backup of {} failed: {e:#}", project.display());
                CoreError::Worker(format!("{e:#}"))
            });
            let _ = tx.send(result);
        })
        .map_err(|e| CoreError::Worker(format!("failed to spawn backup worker: {e}")))?;

    Ok(BackupHandle { slot, rx })
}

fn run_backup(project: &Path, backups_dir: &Path, skip: &[PathBuf]) -> Result<BackupReport> {
    fs::create_dir_all(backups_dir)
        .with_context(|| format!("Failed to create {}", backups_dir.display()))?;

    let id = uuid::Uuid::new_v4();
    let staging = backups_dir.join(format!(".staging-{id}"));
    let report = match copy_tree(project, &staging, skip) {
        Ok(report) => report,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    let slot = backups_dir.join(BACKUP_SLOT);
    let previous = backups_dir.join(format!(".previous-{id}"));
    let had_previous = slot.exists();
    if had_previous {
        fs::rename(&slot, &previous)
            .with_context(|| format!("Failed to move aside {}", slot.display()))?;
    }
    if let Err(e) = fs::rename(&staging, &slot) {
        if had_previous {
            let _ = fs::rename(&previous, &slot);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(e).with_context(|| format!("Failed to install {}", slot.display()));
    }
    if had_previous && let Err(e) = fs::remove_dir_all(&previous) {
        tracing::warn!("Failed to remove old backup {}: {e}", previous.display());
    }

    let manifest = BackupManifest {
        created_at: Utc::now().to_rfc3339(),
        project: project.display().to_string(),
        report,
    };
    let json = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
    crate::sandbox::write_atomic(&backups_dir.join(MANIFEST_FILE), &json)?;

    tracing::info!(
        files = report.files_copied,
        dirs = report.dirs_created,
        bytes = report.bytes_copied,
        "backup complete"
    );
    Ok(report)
}

/// Replaces `project_root` with the contents of its backup slot.
///
/// # Errors
/// `Restore` when no backup exists, the copy fails, or the directory swap
/// fails. A failure before the swap leaves the project untouched.
pub fn restore(project_root: &Path, namespace: &Namespace) -> CoreResult<BackupReport> {
    let project = normalize(project_root);
    let slot = namespace.path(SandboxKind::Backups).join(BACKUP_SLOT);
    if !slot.is_dir() {
        return Err(CoreError::Restore(format!(
            "no backup found at {}",
            slot.display()
        )));
    }
    if let Some(manifest) = BackupManifest::load(namespace) {
        tracing::info!(created_at = %manifest.created_at, "restoring backup");
    }

    let report = swap_in_backup(&project, &slot, namespace.sandbox_root())
        .map_err(|e| CoreError::Restore(format!("{e:#}")))?;

    namespace
        .ensure()
        .map_err(|e| CoreError::Restore(e.to_string()))?;
    Ok(report)
}

fn swap_in_backup(project: &Path, slot: &Path, sandbox_root: &Path) -> Result<BackupReport> {
    let (Some(parent), Some(name)) = (project.parent(), project.file_name()) else {
        bail!("cannot restore into {}", project.display());
    };
    let name = name.to_string_lossy();
    let id = uuid::Uuid::new_v4();
    let staging = parent.join(format!(".{name}.restore-{id}"));
    let aside = parent.join(format!(".{name}.old-{id}"));

    if let Err(e) = fs::create_dir(&staging) {
        if needs_in_place(&e) {
            tracing::warn!(
                "Cannot stage restore beside {} ({e}); restoring in place",
                project.display()
            );
            return restore_in_place(project, slot, sandbox_root);
        }
        return Err(e).with_context(|| format!("Failed to create {}", staging.display()));
    }
    let report = match copy_tree(slot, &staging, &[]) {
        Ok(report) => report,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    // An in-project sandbox root is carried into the new tree.
    let sandbox_root = normalize(sandbox_root);
    let carried = match sandbox_root.strip_prefix(project) {
        Ok(rel) if !rel.as_os_str().is_empty() && sandbox_root.exists() => {
            let dest = staging.join(rel);
            let moved = dest
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| fs::rename(&sandbox_root, &dest));
            if let Err(e) = moved {
                let _ = fs::remove_dir_all(&staging);
                return Err(e).with_context(|| {
                    format!("Failed to move sandbox {}", sandbox_root.display())
                });
            }
            Some(dest)
        }
        _ => None,
    };
    let put_sandbox_back = |carried: &Option<PathBuf>| {
        if let Some(dest) = carried
            && let Err(e) = fs::rename(dest, &sandbox_root)
        {
            tracing::error!("Failed to move sandbox back to {}: {e}", sandbox_root.display());
        }
    };

    if let Err(e) = fs::rename(project, &aside) {
        put_sandbox_back(&carried);
        let _ = fs::remove_dir_all(&staging);
        if needs_in_place(&e) {
            tracing::warn!("Cannot move {} aside ({e}); restoring in place", project.display());
            return restore_in_place(project, slot, &sandbox_root);
        }
        return Err(e).with_context(|| format!("Failed to move aside {}", project.display()));
    }

    if let Err(e) = fs::rename(&staging, project) {
        if let Err(rollback) = fs::rename(&aside, project) {
            tracing::error!(
                "Rollback failed; original tree left at {}: {rollback}",
                aside.display()
            );
        } else {
            put_sandbox_back(&carried);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(e).with_context(|| format!("Failed to swap in {}", project.display()));
    }

    if let Err(e) = fs::remove_dir_all(&aside) {
        tracing::warn!("Failed to remove replaced tree {}: {e}", aside.display());
    }

    tracing::info!(files = report.files_copied, "restore complete");
    Ok(report)
}

/// Errors that rule out the rename swap but not an in-place copy.
fn needs_in_place(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ResourceBusy
            | io::ErrorKind::CrossesDevices
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::ReadOnlyFilesystem
    )
}

/// Empties `project` (an in-project sandbox root is kept) and copies the
/// slot back into it. A failure partway leaves a partially restored tree.
fn restore_in_place(project: &Path, slot: &Path, sandbox_root: &Path) -> Result<BackupReport> {
    let sandbox_root = normalize(sandbox_root);
    clear_dir(project, &sandbox_root)?;
    let report = copy_tree(slot, project, &[])
        .with_context(|| format!("In-place restore of {} is incomplete", project.display()))?;
    tracing::info!(files = report.files_copied, "in-place restore complete");
    Ok(report)
}

/// Removes everything under `dir` except `keep` and its ancestors.
fn clear_dir(dir: &Path, keep: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if path == keep {
            continue;
        }
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if file_type.is_dir() && keep.starts_with(&path) {
            clear_dir(&path, keep)?;
            continue;
        }
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Copies `src` into a new directory `dst`, leaving out anything under
/// `skip`. Directories are created before their contents.
fn copy_tree(src: &Path, dst: &Path, skip: &[PathBuf]) -> Result<BackupReport> {
    let skip = skip.to_vec();
    let walker = WalkBuilder::new(src)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| entry.depth() == 0 || !skip.iter().any(|s| s == entry.path()))
        .build();

    let mut report = BackupReport::default();
    for result in walker {
        let entry = result.context("Failed to walk project tree")?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(rel);
        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            if entry.depth() > 0 {
                report.dirs_created += 1;
            }
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            report.files_copied += 1;
        } else if file_type.is_file() {
            let bytes = fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            report.files_copied += 1;
            report.bytes_copied += bytes;
        } else {
            tracing::debug!(path = %entry.path().display(), "skipping special file");
        }
    }

    Ok(report)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target =
        fs::read_link(src).with_context(|| format!("Failed to read link {}", src.display()))?;
    std::os::unix::fs::symlink(&target, dst)
        .with_context(|| format!("Failed to create link {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .with_context(|| format!("Failed to copy {}", src.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::*;
    use crate::error::ErrorKind;

    fn write(root: &Path, rel: &str, contents: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Relative path -> bytes for every regular file under `root`.
    fn snapshot(root: &Path, skip: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.starts_with(skip) {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_path_buf();
                    files.insert(rel, fs::read(&path).unwrap());
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn test_backup_then_restore_round_trips_bytes() {
        let tmp = tempdir().unwrap();
        let project = tmp.path().join("proj");
        write(&project, "src/a.py", b"print('a')\n");
        write(&project, ".env", b"SECRET=1\n");
        write(&project, "bin/blob", &[0u8, 159, 146, 150, 255]);
        fs::create_dir_all(project.join("empty")).unwrap();

        let namespace = Namespace::new(tmp.path().join("sandbox"), &project);
        namespace.ensure().unwrap();

        let before = snapshot(&project, &tmp.path().join("sandbox"));
        let report = start_backup(&project, &namespace, None)
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.files_copied, 3);
        assert_eq!(report.bytes_copied, 11 + 9 + 5);

        write(&project, "src/a.py", b"changed\n");
        write(&project, "new.txt", b"new\n");
        fs::remove_file(project.join("bin/blob")).unwrap();

        restore(&project, &namespace).unwrap();

        assert_eq!(snapshot(&project, &tmp.path().join("sandbox")), before);
        assert!(project.join("empty").is_dir());
        for dir in namespace.owned_dirs() {
            assert!(dir.is_dir(), "missing {}", dir.display());
        }
        assert!(BackupManifest::load(&namespace).is_some());
    }

    #[tokio::test]
    async fn test_in_project_sandbox_is_excluded_and_survives_restore() {
        let tmp = tempdir().unwrap();
        let project = tmp.path().join("proj");
        write(&project, "main.rs", b"fn main() {}\n");

        let sandbox = project.join("sandbox");
        let namespace = Namespace::new(&sandbox, &project);
        namespace.ensure().unwrap();
        write(
            &namespace.path(SandboxKind::Files),
            "project-content.txt",
            b"bundle",
        );

        let handle = start_backup(&project, &namespace, None).unwrap();
        let slot = handle.slot().to_path_buf();
        handle.wait().await.unwrap();
        assert!(!slot.join("sandbox").exists());
        assert!(slot.join("main.rs").is_file());

        restore(&project, &namespace).unwrap();

        let bundle = namespace.path(SandboxKind::Files).join("project-content.txt");
        assert_eq!(fs::read(bundle).unwrap(), b"bundle");
        assert!(slot.join("main.rs").is_file());
        for dir in namespace.owned_dirs() {
            assert!(dir.is_dir());
        }
    }

    #[tokio::test]
    async fn test_second_backup_replaces_slot() {
        let tmp = tempdir().unwrap();
        let project = tmp.path().join("proj");
        write(&project, "one.txt", b"1");
        let namespace = Namespace::new(tmp.path().join("sandbox"), &project);

        start_backup(&project, &namespace, None).unwrap().wait().await.unwrap();
        fs::remove_file(project.join("one.txt")).unwrap();
        write(&project, "two.txt", b"2");
        let handle = start_backup(&project, &namespace, None).unwrap();
        let slot = handle.slot().to_path_buf();
        handle.wait().await.unwrap();

        assert!(!slot.join("one.txt").exists());
        assert!(slot.join("two.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(slot.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_restore_without_backup_is_restore_error() {
        let tmp = tempdir().unwrap();
        let project = tmp.path().join("proj");
        write(&project, "a.txt", b"a");
        let namespace = Namespace::new(tmp.path().join("sandbox"), &project);

        let err = restore(&project, &namespace).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Restore);
        assert_eq!(fs::read(project.join("a.txt")).unwrap(), b"a");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_recreated() {
        let tmp = tempdir().unwrap();
        let project = tmp.path().join("proj");
        write(&project, "real.txt", b"real");
        std::os::unix::fs::symlink("real.txt", project.join("link.txt")).unwrap();
        let namespace = Namespace::new(tmp.path().join("sandbox"), &project);

        let handle = start_backup(&project, &namespace, None).unwrap();
        let slot = handle.slot().to_path_buf();
        handle.wait().await.unwrap();

        let link = slot.join("link.txt");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(link).unwrap(), PathBuf::from("real.txt"));
    }

    #[test]
    fn test_busy_or_denied_errors_fall_back_to_in_place() {
        for kind in [
            io::ErrorKind::ResourceBusy,
            io::ErrorKind::CrossesDevices,
            io::ErrorKind::PermissionDenied,
        ] {
            assert!(needs_in_place(&io::Error::from(kind)), "{kind:?}");
        }
        assert!(!needs_in_place(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[tokio::test]
    async fn test_in_place_restore_replaces_contents_and_keeps_sandbox() {
        let tmp = tempdir().unwrap();
        let project = tmp.path().join("proj");
        write(&project, "src/a.py", b"original\n");
        write(&project, "keep/me.txt", b"kept\n");

        let sandbox = project.join("state/sandbox");
        let namespace = Namespace::new(&sandbox, &project);
        namespace.ensure().unwrap();
        write(&namespace.path(SandboxKind::Files), "project-content.txt", b"bundle");
        write(&project, "state/other.txt", b"stray");

        let handle = start_backup(&project, &namespace, None).unwrap();
        let slot = handle.slot().to_path_buf();
        handle.wait().await.unwrap();

        write(&project, "src/a.py", b"changed\n");
        write(&project, "new.txt", b"new\n");
        fs::remove_file(project.join("keep/me.txt")).unwrap();

        let report = restore_in_place(&project, &slot, &sandbox).unwrap();

        assert_eq!(report.files_copied, 3);
        assert_eq!(fs::read(project.join("src/a.py")).unwrap(), b"original\n");
        assert_eq!(fs::read(project.join("keep/me.txt")).unwrap(), b"kept\n");
        assert_eq!(fs::read(project.join("state/other.txt")).unwrap(), b"stray");
        assert!(!project.join("new.txt").exists());
        let bundle = namespace.path(SandboxKind::Files).join("project-content.txt");
        assert_eq!(fs::read(bundle).unwrap(), b"bundle");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restore_under_read_only_parent_falls_back_to_in_place() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        let parent = tmp.path().join("locked");
        let project = parent.join("proj");
        write(&project, "a.txt", b"before");
        let namespace = Namespace::new(tmp.path().join("sandbox"), &project);

        start_backup(&project, &namespace, None).unwrap().wait().await.unwrap();
        write(&project, "a.txt", b"after");
        write(&project, "extra.txt", b"x");

        fs::set_permissions(&parent, fs::Permissions::from_mode(0o555)).unwrap();
        if fs::create_dir(parent.join("write-check")).is_ok() {
            // Privileged user: permissions are not enforced.
            fs::set_permissions(&parent, fs::Permissions::from_mode(0o755)).unwrap();
            eprintln!("Skipping: directory permissions are not enforced for this user.");
            return;
        }

        let result = restore(&project, &namespace);
        fs::set_permissions(&parent, fs::Permissions::from_mode(0o755)).unwrap();

        result.unwrap();
        assert_eq!(fs::read(project.join("a.txt")).unwrap(), b"before");
        assert!(!project.join("extra.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(&parent)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["proj".to_string()]);
    }
}
