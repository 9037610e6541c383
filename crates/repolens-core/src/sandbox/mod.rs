//! Per-project sandbox storage: namespace layout, settings, context bundle
//! artifacts and the shared API key store.

pub mod bundle;
pub mod keys;
pub mod namespace;
pub mod settings;

use std::fs;
use std::path::Path;

pub use bundle::BundleStore;
pub use keys::ApiKeyStore;
pub use namespace::{MAX_ID_LEN, Namespace, SandboxKind, encode, namespace_id, normalize, resolve};
pub use settings::{ContextSettings, DynamicContextSetting, SettingsStore, SettingsUpdate};

use crate::error::{CoreError, CoreResult};

/// Writes `contents` to a sibling temp file, then renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    fs::write(&tmp_path, contents).map_err(|e| CoreError::io(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(CoreError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("out.txt");

        write_atomic(&target, b"one").unwrap();
        write_atomic(&target, b"two").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "two");
        let entries: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("out.txt")]);
    }
}
