//! ocwatch - OpenConnect DSID watchdog
//!
//! Keeps an openconnect tunnel alive with the freshest session cookie a
//! browser has issued, restarting it when the cookie rotates, the server
//! refuses it, or traffic stops flowing.

use clap::{Parser, Subcommand};
use ocwatch_core::error::OcwatchError;
use ocwatch_core::init_logging;
use std::path::PathBuf;
use tracing::Level;

mod cli;

#[derive(Parser)]
#[command(name = "ocwatch")]
#[command(about = "Keep an OpenConnect tunnel alive with a browser-issued DSID cookie")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watchdog until interrupted
    Run {
        /// Log the openconnect command instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Echo openconnect output into the log
        #[arg(long = "openconnect-output")]
        openconnect_output: bool,
    },
    /// Copy new DSIDs from the browser cookie store into the handoff file
    Poll,
    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    if let Err(e) = init_logging(level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Run {
            dry_run,
            openconnect_output,
        } => cli::run::run_watchdog(config_path, dry_run, openconnect_output),
        Commands::Poll => cli::poll::run_poller(config_path),
        Commands::CheckConfig => cli::check_config::run_check_config(config_path),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e.downcast_ref::<OcwatchError>() {
                // Configuration errors (exit code 2)
                Some(OcwatchError::Config(_)) => 2,
                // Missing openconnect is a setup problem, not a runtime one
                Some(OcwatchError::Supervisor(
                    ocwatch_core::error::SupervisorError::BinaryNotFound { .. },
                )) => 2,
                // Everything else happened at runtime (exit code 1)
                _ => 1,
            };

            eprintln!("{:#}", e);
            std::process::exit(exit_code);
        }
    }
}
