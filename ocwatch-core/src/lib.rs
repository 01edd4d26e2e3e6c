//! Core library for the ocwatch VPN watchdog
//!
//! This crate provides the reconciliation loop that keeps an `openconnect`
//! tunnel running with the freshest valid DSID session cookie, along with
//! the credential tracking and process supervision it is built from.

pub mod error;

pub mod config;
pub mod controller;
pub mod dsid;
pub mod vpn;

use tracing::Level;

/// Initialize logging infrastructure
///
/// Sets up tracing with systemd journal logging when running as a unit.
/// Otherwise logs to stderr with human readable formatting.
pub fn init_logging(level: Level) -> std::result::Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    #[cfg(target_os = "linux")]
    {
        if std::env::var("JOURNAL_STREAM").is_ok() {
            let journal_layer = tracing_journald::layer()?;
            tracing_subscriber::registry()
                .with(journal_layer)
                .with(LevelFilter::from_level(level))
                .init();
            return Ok(());
        }
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(LevelFilter::from_level(level))
        .init();

    Ok(())
}
