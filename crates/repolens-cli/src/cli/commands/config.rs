//! Config command handlers.

use anyhow::{Context, Result};
use repolens_core::config;

use super::keys::parse_provider;

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn set_provider(provider: &str) -> Result<()> {
    let kind = parse_provider(provider)?;
    config::Config::save_default_provider(kind).context("save default provider")?;
    println!("Default provider set to {}", kind.id());
    Ok(())
}
