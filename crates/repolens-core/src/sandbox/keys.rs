//! Process-wide API key store at `<sandbox-root>/internals/api_keys.json`.
//!
//! Last write wins; there is no locking across processes.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const API_KEYS_FILE: &str = "api_keys.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ApiKeyStore {
    /// Provider id -> key.
    #[serde(flatten)]
    keys: BTreeMap<String, String>,
}

impl ApiKeyStore {
    pub fn path_in(internals_dir: &Path) -> PathBuf {
        internals_dir.join(API_KEYS_FILE)
    }

    /// Loads the store. Returns an empty store if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(internals_dir: &Path) -> Result<Self> {
        let path = Self::path_in(internals_dir);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read API keys from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse API keys from {}", path.display()))
    }

    /// Saves the store with restricted permissions (0600).
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, internals_dir: &Path) -> Result<()> {
        fs::create_dir_all(internals_dir)
            .with_context(|| format!("Failed to create directory {}", internals_dir.display()))?;
        let path = Self::path_in(internals_dir);
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize API keys")?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("Failed to write to {}", path.display()))?;

        Ok(())
    }

    pub fn get(&self, provider: &str) -> Option<&str> {
        self.keys
            .get(provider)
            .map(String::as_str)
            .filter(|k| !k.trim().is_empty())
    }

    pub fn set(&mut self, provider: &str, key: &str) {
        self.keys.insert(provider.to_string(), key.trim().to_string());
    }
}

/// Masks a key for display (first 8 chars + ...).
pub fn mask_key(key: &str) -> String {
    if key.chars().count() <= 12 {
        return "***".to_string();
    }
    let prefix: String = key.chars().take(8).collect();
    format!("{prefix}...")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_missing_store_is_empty() {
        let dir = tempdir().unwrap();
        let store = ApiKeyStore::load(dir.path()).unwrap();
        assert!(store.get("anthropic").is_none());
        assert!(store.get("openai").is_none());
    }

    #[test]
    fn test_set_save_load_last_write_wins() {
        let dir = tempdir().unwrap();
        let internals = dir.path().join("internals");

        let mut store = ApiKeyStore::default();
        store.set("anthropic", " sk-first ");
        store.save(&internals).unwrap();

        let mut again = ApiKeyStore::load(&internals).unwrap();
        assert_eq!(again.get("anthropic"), Some("sk-first"));
        again.set("anthropic", "sk-second");
        again.save(&internals).unwrap();

        let reloaded = ApiKeyStore::load(&internals).unwrap();
        assert_eq!(reloaded.get("anthropic"), Some("sk-second"));
        assert_eq!(reloaded.get("openai"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_with_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let mut store = ApiKeyStore::default();
        store.set("openai", "sk-test");
        store.save(dir.path()).unwrap();

        let mode = fs::metadata(ApiKeyStore::path_in(dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-ant-api03-abcdefgh"), "sk-ant-a...");
        assert_eq!(mask_key("short"), "***");
    }
}
