//! Cookie store poller command

use anyhow::Context;
use ocwatch_core::dsid::{CookieStoreSource, DsidPoller};
use ocwatch_core::error::{ConfigError, OcwatchError};
use std::path::Path;
use tracing::info;

/// Run the `poll` command
///
/// Never returns on its own; stop it with a signal.
pub fn run_poller(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    config
        .validate_cookie_store()
        .map_err(|message| OcwatchError::Config(ConfigError::ValidationError { message }))?;

    let source = CookieStoreSource::new(
        config.cookie_store.path.clone(),
        config.cookie_store.host.clone(),
        config.cookie_store.cookie_name.clone(),
    )
    .with_timeout(config.controller.credential_timeout());
    let poller = DsidPoller::new(source, config.dsid_writer.file.clone());

    info!(
        store = %config.cookie_store.path.display(),
        handoff = %config.dsid_writer.file.display(),
        interval = ?config.dsid_writer.interval(),
        "Polling cookie store for DSID"
    );

    let runtime = super::runtime()?;
    runtime.block_on(async {
        tokio::select! {
            _ = poller.run(config.dsid_writer.interval()) => Ok::<(), anyhow::Error>(()),
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                info!("Received SIGINT, exiting");
                Ok(())
            }
        }
    })
}
