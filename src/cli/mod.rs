//! CLI command implementations
//!
//! This module contains the implementation of all CLI subcommands.

pub mod check_config;
pub mod poll;
pub mod run;

use anyhow::Context;
use ocwatch_core::config::toml_config::{get_config_path, load_config_from_path};
use ocwatch_core::config::Config;
use std::path::Path;

/// Resolve and load the configuration every subcommand starts from
pub(crate) fn load_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let path = get_config_path(explicit);
    let config = load_config_from_path(&path)
        .with_context(|| format!("Could not load {}", path.display()))?;
    Ok(config)
}

/// Build the multi-threaded runtime the long running commands use
pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}
