//! Context bundle production: full scans and dynamic narrowing.

pub mod dynamic;
pub mod scanner;

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub use dynamic::{DynamicContextResult, RejectReason, RejectedPath, extract_paths};
pub use scanner::{ScanOutput, ScanReport, scan, scan_into};

/// Appends one file to a content bundle: the full path, a `=` rule of the
/// same length, then the file text (or an inline read-error annotation).
pub(crate) fn append_file_section(out: &mut String, path: &Path) {
    let header = path.display().to_string();
    let _ = writeln!(out, "{header}");
    let _ = writeln!(out, "{}", "=".repeat(header.chars().count()));

    match fs::read_to_string(path) {
        Ok(text) => {
            out.push_str(&text);
            if !text.ends_with('\n') {
                out.push('\n');
            }
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "unreadable file in bundle");
            let _ = writeln!(out, "[Error reading file: {e}]");
        }
    }
    out.push('\n');
}
