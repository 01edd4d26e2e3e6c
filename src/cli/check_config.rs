//! Configuration check command

use anyhow::Context;
use ocwatch_core::config::toml_config::get_config_path;
use std::path::Path;

/// Run the `check-config` command
pub fn run_check_config(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    println!("# {} is valid", get_config_path(config_path).display());
    println!("{}", rendered);
    Ok(())
}
