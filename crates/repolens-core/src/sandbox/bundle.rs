//! Context bundle artifacts in a project's `files` area.

use std::fs;
use std::path::{Path, PathBuf};

use super::write_atomic;
use crate::error::{CoreError, CoreResult};

pub const STRUCTURE_FILE: &str = "project-structure.txt";
pub const CONTENT_FILE: &str = "project-content.txt";

/// Reads and writes the structure and content artifacts.
#[derive(Debug, Clone)]
pub struct BundleStore {
    dir: PathBuf,
}

impl BundleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn structure_path(&self) -> PathBuf {
        self.dir.join(STRUCTURE_FILE)
    }

    pub fn content_path(&self) -> PathBuf {
        self.dir.join(CONTENT_FILE)
    }

    /// Structure followed by content. Missing artifacts read as empty.
    ///
    /// # Errors
    /// `Io` on any read failure other than a missing file.
    pub fn read(&self) -> CoreResult<String> {
        let (structure, content) = self.read_parts()?;
        Ok(structure + &content)
    }

    /// # Errors
    /// `Io` on any read failure other than a missing file.
    pub fn read_parts(&self) -> CoreResult<(String, String)> {
        Ok((
            read_or_empty(&self.structure_path())?,
            read_or_empty(&self.content_path())?,
        ))
    }

    /// Overwrites both artifacts.
    ///
    /// # Errors
    /// `Io` if either artifact cannot be written.
    pub fn write(&self, structure: &str, content: &str) -> CoreResult<()> {
        write_atomic(&self.structure_path(), structure.as_bytes())?;
        write_atomic(&self.content_path(), content.as_bytes())
    }

    /// Replaces only the content artifact.
    ///
    /// # Errors
    /// `Io` if the artifact cannot be written.
    pub fn write_content(&self, content: &str) -> CoreResult<()> {
        write_atomic(&self.content_path(), content.as_bytes())
    }
}

fn read_or_empty(path: &Path) -> CoreResult<String> {
    match fs::read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CoreError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_artifacts_read_empty() {
        let dir = tempdir().unwrap();
        let store = BundleStore::new(dir.path().join("files"));
        assert_eq!(store.read().unwrap(), "");
    }

    #[test]
    fn test_write_then_read_concatenates() {
        let dir = tempdir().unwrap();
        let store = BundleStore::new(dir.path());

        store.write("/repo\n  a.py\n", "/repo/a.py\n==========\nprint()\n").unwrap();
        assert_eq!(
            store.read().unwrap(),
            "/repo\n  a.py\n/repo/a.py\n==========\nprint()\n"
        );

        store.write_content("narrowed\n").unwrap();
        let (structure, content) = store.read_parts().unwrap();
        assert_eq!(structure, "/repo\n  a.py\n");
        assert_eq!(content, "narrowed\n");
    }
}
