//! Configuration loaded from `$REPOLENS_HOME/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

/// Returns the default config template with comments.
///
/// Embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Merges user config values into the default template.
///
/// New comments and sections from the template stay present while the
/// user's values win.
fn merge_with_template(user_config: &str) -> Result<String> {
    use toml_edit::DocumentMut;

    let mut doc: DocumentMut = default_config_template()
        .parse()
        .context("Failed to parse default config template")?;
    let user_doc: DocumentMut = user_config.parse().context("Failed to parse user config")?;

    merge_items(doc.as_table_mut(), user_doc.as_table());

    Ok(doc.to_string())
}

/// Recursively merges items from source table into target table.
fn merge_items(target: &mut toml_edit::Table, source: &toml_edit::Table) {
    use toml_edit::Item;

    for (key, value) in source {
        match value {
            Item::Value(v) => {
                target[key] = Item::Value(v.clone());
            }
            Item::Table(src_table) => {
                if let Some(Item::Table(target_table)) = target.get_mut(key) {
                    merge_items(target_table, src_table);
                } else {
                    target[key] = Item::Table(src_table.clone());
                }
            }
            Item::ArrayOfTables(src_arr) => {
                target[key] = Item::ArrayOfTables(src_arr.clone());
            }
            Item::None => {}
        }
    }
}

pub mod paths {
    //! Path resolution for repolens configuration and data directories.
    //!
    //! REPOLENS_HOME resolution order:
    //! 1. REPOLENS_HOME environment variable (if set)
    //! 2. ~/.config/repolens
    //! 3. ./.repolens when no home directory can be determined

    use std::path::PathBuf;

    pub fn repolens_home() -> PathBuf {
        if let Ok(home) = std::env::var("REPOLENS_HOME")
            && !home.trim().is_empty()
        {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".repolens"),
            |h| h.join(".config").join("repolens"),
        )
    }

    pub fn config_path() -> PathBuf {
        repolens_home().join("config.toml")
    }

    /// Default sandbox root when config does not set one.
    pub fn default_sandbox_root() -> PathBuf {
        repolens_home().join("sandbox")
    }

    pub fn logs_dir() -> PathBuf {
        repolens_home().join("logs")
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default provider id ("anthropic" or "openai")
    pub provider: String,

    /// Maximum tokens for responses
    pub max_tokens: u32,

    /// Root directory for sandbox namespaces
    pub sandbox_root: Option<String>,

    /// Optional extra instructions for the system prompt
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Config {
    const DEFAULT_PROVIDER: &str = "anthropic";
    const DEFAULT_MAX_TOKENS: u32 = 8192;

    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Resolved provider kind. Unknown ids fall back to Anthropic.
    pub fn provider_kind(&self) -> ProviderKind {
        ProviderKind::from_id(&self.provider).unwrap_or(ProviderKind::Anthropic)
    }

    /// Sandbox root: configured value, or `$REPOLENS_HOME/sandbox`.
    pub fn sandbox_root(&self) -> PathBuf {
        self.sandbox_root
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(paths::default_sandbox_root, PathBuf::from)
    }

    pub fn effective_system_prompt(&self) -> Option<&str> {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Saves only the provider field to the default config file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn save_default_provider(kind: ProviderKind) -> Result<()> {
        Self::save_default_provider_to(&paths::config_path(), kind)
    }

    /// Saves only the provider field to a specific config file path.
    ///
    /// Creates the file from the template if it doesn't exist; otherwise
    /// merges the user's values into the latest template first.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or written.
    pub fn save_default_provider_to(path: &Path, kind: ProviderKind) -> Result<()> {
        use toml_edit::{DocumentMut, value};

        let contents = if path.exists() {
            let user_config = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            merge_with_template(&user_config)?
        } else {
            default_config_template().to_string()
        };

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        doc["provider"] = value(kind.id());

        Self::write_config(path, &doc.to_string())
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Writes config content atomically (temp file + rename), creating
    /// parent directories as needed.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Self::DEFAULT_PROVIDER.to_string(),
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            sandbox_root: None,
            system_prompt: None,
            providers: ProvidersConfig::default(),
        }
    }
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::OpenAI => &self.openai,
        }
    }
}

/// Provider configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderConfig {
    /// Optional API key (wins over the key store and environment).
    pub api_key: Option<String>,
    /// Optional API base URL (for proxies).
    pub base_url: Option<String>,
    /// Model id; the provider default is used when unset.
    pub model: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

impl ProviderConfig {
    pub fn effective_api_key(&self) -> Option<&str> {
        non_empty(self.api_key.as_ref())
    }

    pub fn effective_base_url(&self) -> Option<&str> {
        non_empty(self.base_url.as_ref())
    }

    pub fn effective_model(&self) -> Option<&str> {
        non_empty(self.model.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nonexistent.toml")).unwrap();

        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.provider_kind(), ProviderKind::Anthropic);
    }

    #[test]
    fn test_default_template_parses_to_defaults() {
        let config: Config = toml::from_str(default_config_template()).unwrap();
        assert_eq!(config.provider, Config::default().provider);
        assert_eq!(config.max_tokens, Config::default().max_tokens);
        assert!(config.sandbox_root.is_none());
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(
            &config_path,
            "provider = \"openai\"\n[providers.openai]\nmodel = \"gpt-4.1\"\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.provider_kind(), ProviderKind::OpenAI);
        assert_eq!(config.providers.openai.effective_model(), Some("gpt-4.1"));
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.providers.anthropic.effective_model(), None);
    }

    #[test]
    fn test_init_creates_config_and_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("# repolens Configuration"));
        assert!(contents.contains("[providers.openai]"));

        assert!(Config::init(&config_path).is_err());
    }

    #[test]
    fn test_save_default_provider_preserves_user_values_and_comments() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "max_tokens = 1024\n").unwrap();

        Config::save_default_provider_to(&config_path, ProviderKind::OpenAI).unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_tokens, 1024);
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("# Maximum tokens"));
        assert!(!config_path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_blank_values_are_treated_as_unset() {
        let config = Config {
            sandbox_root: Some("  ".to_string()),
            system_prompt: Some("\n".to_string()),
            providers: ProvidersConfig {
                anthropic: ProviderConfig {
                    base_url: Some("   ".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.providers.anthropic.effective_base_url(), None);
        assert_eq!(config.effective_system_prompt(), None);
        assert!(config.sandbox_root().ends_with("sandbox"));
    }

    #[test]
    fn test_configured_sandbox_root_wins() {
        let config = Config {
            sandbox_root: Some("/tmp/rl-sandbox".to_string()),
            ..Default::default()
        };
        assert_eq!(config.sandbox_root(), PathBuf::from("/tmp/rl-sandbox"));
    }
}
