//! Scan, bundle and settings command handlers.

use anyhow::{Context, Result};
use repolens_core::core::project::{ProjectHandle, ProjectRuntime};
use repolens_core::sandbox::{ContextSettings, SettingsUpdate};
use serde::Serialize;

pub async fn scan(runtime: &ProjectRuntime, project: &ProjectHandle) -> Result<()> {
    let report = runtime.scan(project).await?;
    println!(
        "Scanned {} files ({} entries) in {}",
        report.files_included,
        report.entries_listed,
        project.root().display()
    );
    Ok(())
}

pub fn show(runtime: &ProjectRuntime, project: &ProjectHandle) -> Result<()> {
    let bundle = runtime.bundle(project)?;
    if bundle.is_empty() {
        eprintln!("No context bundle yet. Run `repolens scan` first.");
    }
    print!("{bundle}");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettingsView<'a> {
    #[serde(flatten)]
    settings: &'a ContextSettings,
    dynamic_context: bool,
}

fn print_settings(settings: &ContextSettings, dynamic_context: bool) -> Result<()> {
    let view = SettingsView {
        settings,
        dynamic_context,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&view).context("serialize settings")?
    );
    Ok(())
}

pub fn show_settings(runtime: &ProjectRuntime, project: &ProjectHandle) -> Result<()> {
    let settings = runtime.context_settings(project)?;
    print_settings(&settings, runtime.dynamic_context_enabled(project)?)
}

pub fn set_settings(
    runtime: &ProjectRuntime,
    project: &ProjectHandle,
    update: SettingsUpdate,
) -> Result<()> {
    if update.is_empty() {
        anyhow::bail!("Nothing to update. Pass --include, --exclude or --extensions.");
    }
    let settings = runtime.update_settings(project, update)?;
    print_settings(&settings, runtime.dynamic_context_enabled(project)?)
}

pub fn set_dynamic(runtime: &ProjectRuntime, project: &ProjectHandle, enabled: bool) -> Result<()> {
    runtime.set_dynamic_context(project, enabled)?;
    println!(
        "Dynamic context {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
