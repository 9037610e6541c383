//! Recursive project walk producing the structure listing and content bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;

use super::append_file_section;
use crate::error::{CoreError, CoreResult};
use crate::sandbox::{BundleStore, ContextSettings, normalize};

/// Counts from one full scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Files whose text landed in the content artifact
    pub files_included: usize,
    /// Lines in the structure listing, root excluded
    pub entries_listed: usize,
}

/// Both artifacts of a scan, before they are persisted.
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    pub structure: String,
    pub content: String,
    pub report: ScanReport,
}

/// Walks `root` and renders both artifacts.
///
/// Entries are visited in file-name order, symlinks are listed but never
/// followed, and any path in `skip` (the sandbox root when it lives inside
/// the project) is left out entirely.
///
/// # Errors
/// `Scan` when a directory cannot be read. Unreadable files only produce an
/// inline annotation.
pub fn scan(root: &Path, settings: &ContextSettings, skip: &[PathBuf]) -> CoreResult<ScanOutput> {
    let root = normalize(root);
    let extensions = settings.extension_filter();

    let exclude = Arc::new(settings.clone());
    let skip: Arc<Vec<PathBuf>> = Arc::new(skip.iter().map(|p| normalize(p)).collect());

    let walker = WalkBuilder::new(&root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !exclude.is_excluded_name(&name) && !skip.iter().any(|s| s == entry.path())
        })
        .build();

    let mut out = ScanOutput::default();
    out.structure.push_str(&root.display().to_string());
    out.structure.push('\n');

    for result in walker {
        let entry = result.map_err(|err| {
            let path = match &err {
                ignore::Error::WithPath { path, .. } => path.clone(),
                _ => root.clone(),
            };
            CoreError::scan(&path, err.to_string())
        })?;

        let depth = entry.depth();
        if depth == 0 {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        let file_type = entry.file_type();
        let is_dir = file_type.is_some_and(|ft| ft.is_dir());

        out.structure.push_str(&"  ".repeat(depth));
        out.structure.push_str(&name);
        if is_dir {
            out.structure.push('/');
        }
        out.structure.push('\n');
        out.report.entries_listed += 1;

        let is_file = file_type.is_some_and(|ft| ft.is_file());
        if is_file && settings.is_path_included(entry.path()) && extensions.matches(&name) {
            append_file_section(&mut out.content, entry.path());
            out.report.files_included += 1;
        }
    }

    tracing::debug!(
        root = %root.display(),
        files = out.report.files_included,
        entries = out.report.entries_listed,
        "scan complete"
    );
    Ok(out)
}

/// Runs [`scan`] and persists both artifacts atomically.
///
/// # Errors
/// Propagates scan failures and `Io` from the store.
pub fn scan_into(
    root: &Path,
    settings: &ContextSettings,
    skip: &[PathBuf],
    store: &BundleStore,
) -> CoreResult<ScanReport> {
    let output = scan(root, settings, skip)?;
    store.write(&output.structure, &output.content)?;
    Ok(output.report)
}
