//! Context filter settings and the dynamic-context toggle.
//!
//! Both live as JSON in the project's `settings` area:
//! `context-settings.json` and `dynamic-context.json`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::write_atomic;
use crate::error::{CoreError, CoreResult};

pub const CONTEXT_SETTINGS_FILE: &str = "context-settings.json";
pub const DYNAMIC_CONTEXT_FILE: &str = "dynamic-context.json";

/// OS artifacts that are never part of a project.
const OS_ARTIFACTS: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

const DEFAULT_EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    "venv",
    "vendor",
];

const DEFAULT_FILE_EXTENSIONS: &str = "py|js|jsx|ts|tsx|rs|go|java|kt|swift|c|h|cpp|hpp|cs|rb|php|\
                                       sh|sql|html|css|scss|md|txt|json|toml|yaml|yml|xml";

/// Filters applied to full scans and to dynamic narrowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextSettings {
    /// Substrings of full paths; empty matches everything.
    pub include_paths: BTreeSet<String>,
    /// Entry names skipped at any depth.
    pub exclude_dirs: BTreeSet<String>,
    /// Pipe-delimited extension list (`py|js`), `*` for every file.
    pub file_extensions: String,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            include_paths: BTreeSet::new(),
            exclude_dirs: DEFAULT_EXCLUDE_DIRS.iter().map(|s| (*s).to_string()).collect(),
            file_extensions: DEFAULT_FILE_EXTENSIONS.to_string(),
        }
    }
}

impl ContextSettings {
    /// Exclusion rule shared by every traversal: names in `exclude_dirs`,
    /// OS artifacts and dot-entries are skipped.
    pub fn is_excluded_name(&self, name: &str) -> bool {
        name.starts_with('.') || OS_ARTIFACTS.contains(&name) || self.exclude_dirs.contains(name)
    }

    /// Include rule: with a non-empty `include_paths`, an entry that has an
    /// extension is kept only if its full path contains one of the
    /// substrings. Extensionless entries always pass.
    pub fn is_path_included(&self, path: &Path) -> bool {
        if self.include_paths.is_empty() || path.extension().is_none() {
            return true;
        }
        let full = path.to_string_lossy();
        self.include_paths
            .iter()
            .any(|needle| full.contains(needle.as_str()))
    }

    /// Compiles `file_extensions` into a matcher.
    pub fn extension_filter(&self) -> ExtensionFilter {
        ExtensionFilter::new(&self.file_extensions)
    }

    /// Whether `path` (inside `root`) passes the exclusion rule on every
    /// component, the include rule and the extension pattern.
    pub fn admits(&self, root: &Path, path: &Path, extensions: &ExtensionFilter) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return false;
        };
        let excluded = relative
            .components()
            .any(|c| self.is_excluded_name(&c.as_os_str().to_string_lossy()));
        if excluded || !self.is_path_included(path) {
            return false;
        }
        path.file_name()
            .is_some_and(|name| extensions.matches(&name.to_string_lossy()))
    }
}

/// Upper bound on the compiled extension matcher.
const EXTENSION_PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Case-insensitive suffix matcher built from a pipe-delimited list.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    regex: Option<Regex>,
}

impl ExtensionFilter {
    /// Like [`ExtensionFilter::try_new`], but a pattern that does not
    /// compile matches every file and logs a warning.
    pub fn new(pattern: &str) -> Self {
        Self::try_new(pattern).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unusable file extension pattern: {e}");
            Self { regex: None }
        })
    }

    /// An empty pattern or one containing `*` matches every file.
    ///
    /// # Errors
    /// Returns an error when the compiled matcher exceeds its size limit.
    pub fn try_new(pattern: &str) -> Result<Self, regex::Error> {
        let parts: Vec<String> = pattern
            .split('|')
            .map(|p| p.trim().trim_start_matches('.'))
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();

        if parts.is_empty() || parts.iter().any(|p| p == r"\*") {
            return Ok(Self { regex: None });
        }

        let source = format!(r"(?i)\.(?:{})$", parts.join("|"));
        let regex = RegexBuilder::new(&source)
            .size_limit(EXTENSION_PATTERN_SIZE_LIMIT)
            .build()?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.regex.as_ref().is_none_or(|re| re.is_match(file_name))
    }
}

/// Persisted dynamic-context toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicContextSetting {
    pub enabled: bool,
}

/// Partial update applied by `SettingsStore::update`.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub include_paths: Option<Vec<String>>,
    pub exclude_dirs: Option<Vec<String>>,
    pub file_extensions: Option<String>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.include_paths.is_none() && self.exclude_dirs.is_none() && self.file_extensions.is_none()
    }

    fn apply(self, settings: &mut ContextSettings) {
        fn clean(values: Vec<String>) -> BTreeSet<String> {
            values
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        }

        if let Some(include) = self.include_paths {
            settings.include_paths = clean(include);
        }
        if let Some(exclude) = self.exclude_dirs {
            settings.exclude_dirs = clean(exclude);
        }
        if let Some(extensions) = self.file_extensions {
            settings.file_extensions = extensions.trim().to_string();
        }
    }
}

/// JSON persistence over a project's `settings` directory.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    dir: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Loads context settings; a missing file yields defaults.
    ///
    /// # Errors
    /// `Io` on read failure, `InvalidInput` on malformed JSON.
    pub fn context_settings(&self) -> CoreResult<ContextSettings> {
        self.load(CONTEXT_SETTINGS_FILE)
    }

    /// # Errors
    /// `Io` if the file cannot be written.
    pub fn save_context_settings(&self, settings: &ContextSettings) -> CoreResult<()> {
        self.save(CONTEXT_SETTINGS_FILE, settings)
    }

    /// Applies a partial update and persists the result.
    ///
    /// # Errors
    /// `InvalidInput` when the extension pattern cannot be compiled;
    /// otherwise propagates load/save failures.
    pub fn update(&self, update: SettingsUpdate) -> CoreResult<ContextSettings> {
        let mut settings = self.context_settings()?;
        update.apply(&mut settings);
        ExtensionFilter::try_new(&settings.file_extensions).map_err(|e| {
            CoreError::invalid_input(format!("Invalid file extension pattern: {e}"))
        })?;
        self.save_context_settings(&settings)?;
        tracing::info!(dir = %self.dir.display(), "context settings updated");
        Ok(settings)
    }

    /// # Errors
    /// `Io` on read failure, `InvalidInput` on malformed JSON.
    pub fn dynamic_context(&self) -> CoreResult<DynamicContextSetting> {
        self.load(DYNAMIC_CONTEXT_FILE)
    }

    /// # Errors
    /// `Io` if the file cannot be written.
    pub fn set_dynamic_context(&self, enabled: bool) -> CoreResult<()> {
        self.save(DYNAMIC_CONTEXT_FILE, &DynamicContextSetting { enabled })
    }

    fn load<T: DeserializeOwned + Default>(&self, file: &str) -> CoreResult<T> {
        let path = self.dir.join(file);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(CoreError::io(&path, e)),
        };
        if contents.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&contents).map_err(|e| {
            CoreError::invalid_input(format!("Malformed settings file {}: {e}", path.display()))
        })
    }

    fn save<T: Serialize>(&self, file: &str, value: &T) -> CoreResult<()> {
        let path = self.dir.join(file);
        let json = serde_json::to_vec_pretty(value).map_err(|e| {
            CoreError::invalid_input(format!("Failed to serialize {file}: {e}"))
        })?;
        write_atomic(&path, &json)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_exclusion_rule() {
        let settings = ContextSettings::default();
        assert!(settings.is_excluded_name("node_modules"));
        assert!(settings.is_excluded_name(".env"));
        assert!(settings.is_excluded_name(".git"));
        assert!(settings.is_excluded_name("Thumbs.db"));
        assert!(!settings.is_excluded_name("src"));
    }

    #[test]
    fn test_include_rule_lets_extensionless_entries_through() {
        let settings = ContextSettings {
            include_paths: ["src/".to_string()].into(),
            ..Default::default()
        };
        assert!(settings.is_path_included(Path::new("/repo/src/a.py")));
        assert!(!settings.is_path_included(Path::new("/repo/lib/b.py")));
        assert!(settings.is_path_included(Path::new("/repo/lib")));
        assert!(settings.is_path_included(Path::new("/repo/Makefile")));
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::new("py|.JS| ts ");
        assert!(filter.matches("a.py"));
        assert!(filter.matches("b.js"));
        assert!(filter.matches("C.Ts"));
        assert!(!filter.matches("d.rs"));
        assert!(!filter.matches("py"));

        assert!(ExtensionFilter::new("*").matches("anything.bin"));
        assert!(ExtensionFilter::new("").matches("Makefile"));
        // Regex metacharacters are literal.
        assert!(!ExtensionFilter::new("p+").matches("a.pp"));
    }

    #[test]
    fn test_admits_checks_every_component() {
        let settings = ContextSettings::default();
        let filter = settings.extension_filter();
        let root = Path::new("/repo");

        assert!(settings.admits(root, Path::new("/repo/src/a.py"), &filter));
        assert!(!settings.admits(root, Path::new("/repo/node_modules/x/a.js"), &filter));
        assert!(!settings.admits(root, Path::new("/repo/.venv/a.py"), &filter));
        assert!(!settings.admits(root, Path::new("/elsewhere/a.py"), &filter));
        assert!(!settings.admits(root, Path::new("/repo/image.png"), &filter));
    }

    #[test]
    fn test_store_defaults_and_update() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());

        assert_eq!(store.context_settings().unwrap(), ContextSettings::default());
        assert!(!store.dynamic_context().unwrap().enabled);

        let updated = store
            .update(SettingsUpdate {
                include_paths: Some(vec!["src/".to_string(), "  ".to_string()]),
                file_extensions: Some("py".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.include_paths.len(), 1);
        assert_eq!(updated.exclude_dirs, ContextSettings::default().exclude_dirs);

        let raw = fs::read_to_string(dir.path().join(CONTEXT_SETTINGS_FILE)).unwrap();
        assert!(raw.contains("\"includePaths\""));
        assert!(raw.contains("\"fileExtensions\": \"py\""));

        store.set_dynamic_context(true).unwrap();
        assert!(store.dynamic_context().unwrap().enabled);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONTEXT_SETTINGS_FILE),
            r#"{"fileExtensions":"rs"}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(dir.path()).context_settings().unwrap();
        assert_eq!(settings.file_extensions, "rs");
        assert!(settings.exclude_dirs.contains("node_modules"));
    }

    #[test]
    fn test_malformed_settings_is_invalid_input() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONTEXT_SETTINGS_FILE), "{not json").unwrap();

        let err = SettingsStore::new(dir.path()).context_settings().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_oversized_extension_pattern_is_rejected() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path());
        let huge = (0..200_000).map(|i| format!("x{i}")).collect::<Vec<_>>().join("|");

        assert!(ExtensionFilter::try_new(&huge).is_err());
        assert!(ExtensionFilter::new(&huge).matches("anything.bin"));

        let err = store
            .update(SettingsUpdate {
                file_extensions: Some(huge),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
        assert_eq!(store.context_settings().unwrap(), ContextSettings::default());
    }
}
