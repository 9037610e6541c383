//! Per-project runtime: binds a project directory to its sandbox namespace
//! and serializes mutating operations on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::events::FrameTx;
use super::relay::{RelayOutcome, relay};
use crate::backup::{self, BackupHandle, BackupReport};
use crate::config::Config;
use crate::context::{self, DynamicContextResult, ScanReport};
use crate::error::{CoreError, CoreResult};
use crate::prompts;
use crate::providers::{ConversationMessage, ProviderClient, ProviderKind};
use crate::sandbox::{
    ApiKeyStore, BundleStore, ContextSettings, Namespace, SandboxKind, SettingsStore,
    SettingsUpdate, normalize,
};

/// Absolute path of a project directory; the identity key for all
/// per-project state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectHandle {
    root: PathBuf,
}

impl ProjectHandle {
    /// # Errors
    /// `InvalidInput` if `path` is empty, relative or not a directory.
    pub fn new(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(CoreError::invalid_input("project path is empty"));
        }
        if !path.is_absolute() {
            return Err(CoreError::invalid_input(format!(
                "project path must be absolute: {}",
                path.display()
            )));
        }
        let root = normalize(path);
        if !root.is_dir() {
            return Err(CoreError::invalid_input(format!(
                "project path is not a directory: {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Result of one chat turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Present when dynamic context ran before the relay
    pub dynamic: Option<DynamicContextResult>,
    pub relay: RelayOutcome,
}

type ProjectLock = Arc<tokio::sync::Mutex<()>>;

/// Entry point for every project operation.
pub struct ProjectRuntime {
    config: Config,
    sandbox_root: PathBuf,
    locks: Mutex<HashMap<String, ProjectLock>>,
}

impl ProjectRuntime {
    pub fn new(config: Config) -> Self {
        let configured = config.sandbox_root();
        let sandbox_root = if configured.is_absolute() {
            normalize(&configured)
        } else {
            std::env::current_dir().map_or(configured.clone(), |cwd| normalize(&cwd.join(&configured)))
        };
        Self {
            config,
            sandbox_root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sandbox_root(&self) -> &Path {
        &self.sandbox_root
    }

    pub fn namespace(&self, project: &ProjectHandle) -> Namespace {
        Namespace::new(&self.sandbox_root, project.root())
    }

    fn lock_for(&self, namespace: &Namespace) -> ProjectLock {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(namespace.id().to_string()).or_default())
    }

    fn prepared(&self, project: &ProjectHandle) -> CoreResult<Namespace> {
        let namespace = self.namespace(project);
        namespace.ensure()?;
        Ok(namespace)
    }

    /// # Errors
    /// `Io` if the namespace cannot be created.
    pub fn bundle_store(&self, project: &ProjectHandle) -> CoreResult<BundleStore> {
        Ok(BundleStore::new(
            self.prepared(project)?.path(SandboxKind::Files),
        ))
    }

    /// # Errors
    /// `Io` if the namespace cannot be created.
    pub fn settings_store(&self, project: &ProjectHandle) -> CoreResult<SettingsStore> {
        Ok(SettingsStore::new(
            self.prepared(project)?.path(SandboxKind::Settings),
        ))
    }

    /// Full scan into the project's bundle.
    ///
    /// # Errors
    /// `Scan` on an unreadable directory, `Io` on storage failure.
    pub async fn scan(&self, project: &ProjectHandle) -> CoreResult<ScanReport> {
        let namespace = self.prepared(project)?;
        let lock = self.lock_for(&namespace);
        let _guard = lock.lock().await;

        let settings = SettingsStore::new(namespace.path(SandboxKind::Settings)).context_settings()?;
        let store = BundleStore::new(namespace.path(SandboxKind::Files));
        let report = context::scan_into(
            project.root(),
            &settings,
            &[self.sandbox_root.clone()],
            &store,
        )?;
        tracing::info!(
            project = %project.root().display(),
            files = report.files_included,
            "scan finished"
        );
        Ok(report)
    }

    /// Structure followed by content.
    ///
    /// # Errors
    /// `Io` on read failure.
    pub fn bundle(&self, project: &ProjectHandle) -> CoreResult<String> {
        self.bundle_store(project)?.read()
    }

    /// # Errors
    /// `InvalidInput` for malformed stored settings, `Io` on failure.
    pub fn context_settings(&self, project: &ProjectHandle) -> CoreResult<ContextSettings> {
        self.settings_store(project)?.context_settings()
    }

    /// # Errors
    /// `InvalidInput` for malformed stored settings, `Io` on failure.
    pub fn update_settings(
        &self,
        project: &ProjectHandle,
        update: SettingsUpdate,
    ) -> CoreResult<ContextSettings> {
        self.settings_store(project)?.update(update)
    }

    /// # Errors
    /// `InvalidInput` for malformed stored settings, `Io` on failure.
    pub fn dynamic_context_enabled(&self, project: &ProjectHandle) -> CoreResult<bool> {
        Ok(self.settings_store(project)?.dynamic_context()?.enabled)
    }

    /// # Errors
    /// `Io` if the toggle cannot be written.
    pub fn set_dynamic_context(&self, project: &ProjectHandle, enabled: bool) -> CoreResult<()> {
        self.settings_store(project)?.set_dynamic_context(enabled)
    }

    /// Shared key store under `internals`.
    ///
    /// # Errors
    /// Returns an error if the store exists but cannot be read.
    pub fn api_keys(&self) -> Result<ApiKeyStore> {
        ApiKeyStore::load(&self.internals_dir())
    }

    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub fn save_api_key(&self, kind: ProviderKind, key: &str) -> Result<()> {
        let internals = self.internals_dir();
        let mut store = ApiKeyStore::load(&internals)?;
        store.set(kind.id(), key);
        store.save(&internals)
    }

    fn internals_dir(&self) -> PathBuf {
        self.sandbox_root.join(SandboxKind::Internals.as_str())
    }

    /// Builds a client for `kind` (or the configured default).
    ///
    /// # Errors
    /// `InvalidInput` when no usable credentials or endpoint exist.
    pub fn provider_client(
        &self,
        kind: Option<ProviderKind>,
        model: Option<&str>,
    ) -> CoreResult<ProviderClient> {
        let kind = kind.unwrap_or_else(|| self.config.provider_kind());
        let keys = self.api_keys().unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable key store: {e:#}");
            ApiKeyStore::default()
        });
        ProviderClient::from_config(kind, &self.config, model, keys.get(kind.id()))
            .map_err(|e| CoreError::invalid_input(e.to_string()))
    }

    /// System prompt assembled from the current bundle.
    ///
    /// # Errors
    /// `Io` on read failure.
    pub fn system_prompt(&self, project: &ProjectHandle) -> CoreResult<String> {
        let (structure, content) = self.bundle_store(project)?.read_parts()?;
        Ok(prompts::build_system_prompt(
            self.config.effective_system_prompt(),
            project.root(),
            &structure,
            &content,
        ))
    }

    /// Asks the model which files matter and narrows the content artifact.
    ///
    /// # Errors
    /// `UpstreamApi` on provider failure, `Cancelled` on abort.
    pub async fn dynamic_context(
        &self,
        project: &ProjectHandle,
        client: &ProviderClient,
        conversation: &[ConversationMessage],
        cancel: &CancellationToken,
    ) -> CoreResult<DynamicContextResult> {
        let namespace = self.prepared(project)?;
        let lock = self.lock_for(&namespace);
        let _guard = lock.lock().await;

        let settings = SettingsStore::new(namespace.path(SandboxKind::Settings)).context_settings()?;
        let store = BundleStore::new(namespace.path(SandboxKind::Files));
        let system_prompt = self.system_prompt(project)?;
        context::dynamic::narrow(
            client,
            conversation,
            &system_prompt,
            project.root(),
            &settings,
            &store,
            cancel,
        )
        .await
    }

    /// Runs one chat turn: dynamic narrowing when enabled, then the relay.
    ///
    /// # Errors
    /// Propagates dynamic-context and relay failures. A cancelled relay is
    /// reported through the outcome state.
    pub async fn chat(
        &self,
        project: &ProjectHandle,
        client: &ProviderClient,
        conversation: &mut Vec<ConversationMessage>,
        frames: FrameTx,
        cancel: &CancellationToken,
    ) -> CoreResult<ChatOutcome> {
        let dynamic = if self.dynamic_context_enabled(project)? {
            Some(
                self.dynamic_context(project, client, conversation, cancel)
                    .await?,
            )
        } else {
            None
        };

        let system_prompt = self.system_prompt(project)?;
        let relay = relay(client, conversation, Some(&system_prompt), frames, cancel).await?;
        Ok(ChatOutcome { dynamic, relay })
    }

    /// Starts a backup. The project stays locked until the worker ends.
    ///
    /// # Errors
    /// `Io` if the namespace cannot be created, `Worker` if the worker
    /// cannot start.
    pub async fn backup(&self, project: &ProjectHandle) -> CoreResult<BackupHandle> {
        let namespace = self.prepared(project)?;
        let guard = self.lock_for(&namespace).lock_owned().await;
        tracing::info!(project = %project.root().display(), "backup started");
        backup::start_backup(project.root(), &namespace, Some(guard))
    }

    /// # Errors
    /// `Restore` when no backup exists or the swap fails.
    pub async fn restore(&self, project: &ProjectHandle) -> CoreResult<BackupReport> {
        let namespace = self.namespace(project);
        let lock = self.lock_for(&namespace);
        let _guard = lock.lock().await;
        backup::restore(project.root(), &namespace)
    }
}
