//! API key command handlers.

use anyhow::{Result, anyhow};
use repolens_core::core::project::ProjectRuntime;
use repolens_core::providers::ProviderKind;
use repolens_core::sandbox::keys::mask_key;

pub(crate) fn parse_provider(id: &str) -> Result<ProviderKind> {
    ProviderKind::from_id(id)
        .ok_or_else(|| anyhow!("Unknown provider '{id}'. Valid options: anthropic, openai"))
}

pub fn set(runtime: &ProjectRuntime, provider: &str, key: &str) -> Result<()> {
    let kind = parse_provider(provider)?;
    if key.trim().is_empty() {
        anyhow::bail!("API key cannot be empty");
    }
    runtime.save_api_key(kind, key)?;
    println!("Saved {} API key ({})", kind.label(), mask_key(key.trim()));
    Ok(())
}

pub fn list(runtime: &ProjectRuntime) -> Result<()> {
    let store = runtime.api_keys()?;
    for kind in ProviderKind::all() {
        let shown = match store.get(kind.id()) {
            Some(key) => mask_key(key),
            None if std::env::var(kind.api_key_env_var()).is_ok_and(|v| !v.trim().is_empty()) => {
                format!("(from {})", kind.api_key_env_var())
            }
            None => "(not set)".to_string(),
        };
        println!("{:<10} {shown}", kind.id());
    }
    Ok(())
}
