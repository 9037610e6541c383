//! Backup and restore command handlers.

use anyhow::Result;
use repolens_core::core::project::{ProjectHandle, ProjectRuntime};

pub async fn backup(runtime: &ProjectRuntime, project: &ProjectHandle) -> Result<()> {
    let handle = runtime.backup(project).await?;
    println!("Backup started");

    let report = handle.wait().await?;
    println!(
        "Backup complete: {} files, {} directories, {} bytes",
        report.files_copied, report.dirs_created, report.bytes_copied
    );
    Ok(())
}

pub async fn restore(runtime: &ProjectRuntime, project: &ProjectHandle) -> Result<()> {
    let report = runtime.restore(project).await?;
    println!(
        "Restored {} files into {}",
        report.files_copied,
        project.root().display()
    );
    Ok(())
}
