//! CLI command handlers.

pub mod backup;
pub mod chat;
pub mod config;
pub mod context;
pub mod keys;
pub mod run;
