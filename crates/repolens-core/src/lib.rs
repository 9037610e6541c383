//! Core repolens library: project sandboxes, context bundles, provider
//! streaming, backups and command execution.

pub mod backup;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
pub mod prompts;
pub mod providers;
pub mod runner;
pub mod sandbox;
