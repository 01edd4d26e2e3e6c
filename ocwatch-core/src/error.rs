//! Error types for the ocwatch watchdog
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and readable log messages.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the ocwatch application
#[derive(Error, Debug)]
pub enum OcwatchError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to the supervised tunnel process
    #[error("Tunnel error: {0}")]
    Supervisor(#[from] SupervisorError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Tunnel supervisor lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("No DSID credential assigned")]
    NoCredential,

    #[error("Tunnel process already running")]
    AlreadyRunning,

    #[error("Failed to set up {stream} pipe")]
    PipeSetupFailed { stream: &'static str },

    #[error("Failed to spawn tunnel process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Tunnel binary not found on PATH: {binary}")]
    BinaryNotFound { binary: String },
}

/// Credential source errors
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Failed to read credential: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Cookie {name} not found for host {host}")]
    NotFound { host: String, name: String },

    #[error("Cookie {name} for host {host} is encrypted")]
    Encrypted { host: String, name: String },

    #[error("Cookie store error: {0}")]
    Store(#[from] rusqlite::Error),
}
