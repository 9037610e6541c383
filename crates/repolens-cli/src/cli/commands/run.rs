//! Command batch handler.

use std::io::Read;

use anyhow::{Context, Result};
use repolens_core::core::interrupt;
use repolens_core::core::project::ProjectHandle;
use repolens_core::runner;
use tokio::sync::mpsc;

use crate::cli::Interrupted;

pub async fn run(project: &ProjectHandle, args: &[String]) -> Result<()> {
    let input = if args.is_empty() {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read commands from stdin")?;
        buf
    } else {
        args.join("\n")
    };

    let commands = runner::parse_commands(&input);
    if commands.is_empty() {
        anyhow::bail!("No commands to run");
    }

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let cancel = interrupt::token();
    let printer = async move {
        while let Some(line) = rx.recv().await {
            println!("{line}");
        }
    };

    let (report, ()) = tokio::join!(
        runner::run_batch(&commands, project.root(), tx, &cancel),
        printer
    );

    if report.was_cancelled() {
        return Err(Interrupted.into());
    }
    Ok(())
}
