//! Watchdog command
//!
//! Wires configuration into a controller and runs it until SIGINT or SIGTERM.

use anyhow::Context;
use ocwatch_core::config::{Config, CredentialSourceKind};
use ocwatch_core::controller::{Controller, ControllerSettings};
use ocwatch_core::dsid::{CookieStoreSource, CredentialSource, FileCredentialSource};
use ocwatch_core::error::{OcwatchError, SupervisorError};
use ocwatch_core::vpn::{HealthChecker, SupervisorSettings, TunnelSupervisor};
use std::path::Path;
use tracing::{info, warn};

/// Run the `run` command
pub fn run_watchdog(
    config_path: Option<&Path>,
    dry_run: bool,
    openconnect_output: bool,
) -> anyhow::Result<()> {
    let mut config = super::load_config(config_path)?;
    config.openconnect.dry_run |= dry_run;
    config.openconnect.verbose |= openconnect_output;

    if !config.openconnect.dry_run {
        let resolved = which::which(&config.openconnect.binary).map_err(|_| {
            OcwatchError::Supervisor(SupervisorError::BinaryNotFound {
                binary: config.openconnect.binary.clone(),
            })
        })?;
        info!("Using openconnect at {}", resolved.display());
    }

    let prober = HealthChecker::new(
        config.health_check.host.clone(),
        config.health_check.port,
        config.health_check.timeout(),
    )
    .context("Invalid health check settings")?;

    let runtime = super::runtime()?;
    runtime.block_on(async {
        match config.controller.credential_source {
            CredentialSourceKind::File => {
                let source = FileCredentialSource::new(
                    config.dsid_writer.file.clone(),
                    config.controller.credential_timeout(),
                );
                info!("Reading DSID from {}", source.path().display());
                supervise(&config, source, prober).await;
            }
            CredentialSourceKind::CookieStore => {
                let source = CookieStoreSource::new(
                    config.cookie_store.path.clone(),
                    config.cookie_store.host.clone(),
                    config.cookie_store.cookie_name.clone(),
                )
                .with_timeout(config.controller.credential_timeout());
                info!(
                    "Reading DSID from cookie store {}",
                    config.cookie_store.path.display()
                );
                supervise(&config, source, prober).await;
            }
        }
    });

    info!("ocwatch stopped");
    Ok(())
}

async fn supervise<S: CredentialSource>(config: &Config, source: S, prober: HealthChecker) {
    let supervisor = TunnelSupervisor::new(SupervisorSettings::from_config(
        &config.vpn,
        &config.openconnect,
    ));
    let controller = Controller::new(
        ControllerSettings::from(&config.controller),
        source,
        prober,
        supervisor,
    );
    controller.run(shutdown_signal()).await;
}

/// Resolves on the first SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupt => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
