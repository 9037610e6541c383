//! CLI entry and dispatch.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use repolens_core::config::{self, Config};
use repolens_core::core::interrupt;
use repolens_core::core::project::{ProjectHandle, ProjectRuntime};
use repolens_core::logging;

mod commands;

#[derive(Parser)]
#[command(name = "repolens")]
#[command(version)]
#[command(about = "Project context and execution runtime for AI chat assistants")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory (default: current directory)
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    project: PathBuf,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Scan the project into its context bundle
    Scan,
    /// Print the current context bundle
    Context,
    /// Show or change context settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Send a prompt with the project context and stream the reply
    Chat {
        /// The prompt to send
        #[arg(short, long)]
        prompt: String,

        /// Provider to use (anthropic, openai)
        #[arg(long)]
        provider: Option<String>,

        /// Override the model from config
        #[arg(short, long)]
        model: Option<String>,

        /// Conversation history JSON file; updated with the new turn
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Attach an image to the prompt (repeatable)
        #[arg(long = "image", value_name = "FILE")]
        images: Vec<PathBuf>,

        /// Print protocol frames instead of plain text
        #[arg(long)]
        frames: bool,
    },
    /// Run shell commands in the project directory (args or stdin, one per line)
    Run {
        #[arg(value_name = "COMMAND")]
        commands: Vec<String>,
    },
    /// Snapshot the project into its backup slot
    Backup,
    /// Replace the project with its latest backup
    Restore,
    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        command: KeysCommands,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum SettingsCommands {
    /// Show the project's context settings
    Show,
    /// Update context settings (unspecified fields are kept)
    Set {
        /// Path substrings to include (comma-separated; empty clears)
        #[arg(long, value_delimiter = ',')]
        include: Option<Vec<String>>,

        /// Directory names to exclude (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude: Option<Vec<String>>,

        /// File extensions, pipe-delimited (e.g. "py|js|ts")
        #[arg(long)]
        extensions: Option<String>,
    },
    /// Turn dynamic context on or off
    Dynamic {
        #[arg(value_parser = ["on", "off"])]
        state: String,
    },
}

#[derive(clap::Subcommand)]
enum KeysCommands {
    /// Store an API key for a provider
    Set {
        #[arg(value_name = "PROVIDER")]
        provider: String,
        #[arg(value_name = "KEY")]
        key: String,
    },
    /// List stored keys (masked)
    List,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Set the default provider for `chat`
    Provider {
        #[arg(value_name = "PROVIDER")]
        provider: String,
    },
}

/// Returned when Ctrl+C ended the command; maps to exit code 130.
#[derive(Debug)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for Interrupted {}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init(&config::paths::logs_dir());
    interrupt::init().context("install Ctrl+C handler")?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

fn resolve_project(path: &Path) -> Result<ProjectHandle> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("resolve project path {}", path.display()))?;
    Ok(ProjectHandle::new(absolute)?)
}

async fn dispatch(cli: Cli) -> Result<()> {
    let Cli { command, project } = cli;

    if let Commands::Config { command } = &command {
        return match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Provider { provider } => commands::config::set_provider(provider),
        };
    }

    let config = Config::load().context("load config")?;
    let runtime = ProjectRuntime::new(config);

    match command {
        Commands::Scan => commands::context::scan(&runtime, &resolve_project(&project)?).await,
        Commands::Context => commands::context::show(&runtime, &resolve_project(&project)?),
        Commands::Settings { command } => {
            let project = resolve_project(&project)?;
            match command {
                SettingsCommands::Show => commands::context::show_settings(&runtime, &project),
                SettingsCommands::Set {
                    include,
                    exclude,
                    extensions,
                } => commands::context::set_settings(
                    &runtime,
                    &project,
                    repolens_core::sandbox::SettingsUpdate {
                        include_paths: include,
                        exclude_dirs: exclude,
                        file_extensions: extensions,
                    },
                ),
                SettingsCommands::Dynamic { state } => {
                    commands::context::set_dynamic(&runtime, &project, state == "on")
                }
            }
        }
        Commands::Chat {
            prompt,
            provider,
            model,
            history,
            images,
            frames,
        } => {
            let project = resolve_project(&project)?;
            commands::chat::run(
                &runtime,
                &project,
                commands::chat::ChatOptions {
                    prompt: &prompt,
                    provider: provider.as_deref(),
                    model: model.as_deref(),
                    history: history.as_deref(),
                    images: &images,
                    frames,
                },
            )
            .await
        }
        Commands::Run { commands: lines } => {
            commands::run::run(&resolve_project(&project)?, &lines).await
        }
        Commands::Backup => commands::backup::backup(&runtime, &resolve_project(&project)?).await,
        Commands::Restore => commands::backup::restore(&runtime, &resolve_project(&project)?).await,
        Commands::Keys { command } => match command {
            KeysCommands::Set { provider, key } => commands::keys::set(&runtime, &provider, &key),
            KeysCommands::List => commands::keys::list(&runtime),
        },
        // Handled before config is loaded.
        Commands::Config { .. } => Ok(()),
    }
}
