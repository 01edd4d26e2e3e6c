//! Configuration module
//!
//! Holds the typed configuration sections and their validation rules.
//! File I/O lives in [`toml_config`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod toml_config;

/// Where the controller reads the current DSID from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSourceKind {
    /// Handoff file written by `ocwatch poll`
    #[default]
    File,
    /// Query the browser cookie store directly
    CookieStore,
}

/// Reconciliation loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// How long health checks may fail before the tunnel is torn down
    #[serde(default = "default_health_grace")]
    pub health_check_grace_period_secs: u64,

    #[serde(default)]
    pub credential_source: CredentialSourceKind,

    /// Bound on a single read of the credential source
    #[serde(default = "default_credential_timeout")]
    pub credential_timeout_secs: u64,
}

impl ControllerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn health_check_grace_period(&self) -> Duration {
        Duration::from_secs(self.health_check_grace_period_secs)
    }

    pub fn credential_timeout(&self) -> Duration {
        Duration::from_secs(self.credential_timeout_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            health_check_grace_period_secs: default_health_grace(),
            credential_source: CredentialSourceKind::default(),
            credential_timeout_secs: default_credential_timeout(),
        }
    }
}

/// Handoff file writer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsidWriterConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_handoff_file")]
    pub file: PathBuf,
}

impl DsidWriterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for DsidWriterConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            file: default_handoff_file(),
        }
    }
}

/// Browser cookie store location and the cookie to extract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieStoreConfig {
    #[serde(default)]
    pub path: PathBuf,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Cookie host key, e.g. `vpn.example.com`
    #[serde(default)]
    pub host: String,
}

impl Default for CookieStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            cookie_name: default_cookie_name(),
            host: String::new(),
        }
    }
}

/// TCP reachability probe target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub host: String,
    pub port: u16,

    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl HealthCheckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            host: "8.8.8.8".to_string(),
            port: 53,
            timeout_secs: default_probe_timeout(),
        }
    }
}

/// How the openconnect child is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenConnectConfig {
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Whitespace separated arguments inserted before the URL
    #[serde(default)]
    pub extra_args: String,

    /// Echo the child's output into the log
    #[serde(default)]
    pub verbose: bool,

    /// Pretend to start the tunnel without spawning anything
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_period_secs: u64,
}

impl OpenConnectConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    pub fn extra_args(&self) -> Vec<String> {
        self.extra_args
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

impl Default for OpenConnectConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            extra_args: String::new(),
            verbose: false,
            dry_run: false,
            shutdown_grace_period_secs: default_shutdown_grace(),
        }
    }
}

/// VPN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VpnConfig {
    pub url: String,
}

/// Complete watchdog configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub dsid_writer: DsidWriterConfig,

    #[serde(default)]
    pub cookie_store: CookieStoreConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(default)]
    pub openconnect: OpenConnectConfig,

    pub vpn: VpnConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// Returns a message describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.controller.interval_secs == 0 {
            return Err("controller.interval_secs cannot be zero".to_string());
        }
        if self.controller.health_check_grace_period_secs == 0 {
            return Err("controller.health_check_grace_period_secs cannot be zero".to_string());
        }
        if self.controller.credential_timeout_secs == 0 {
            return Err("controller.credential_timeout_secs cannot be zero".to_string());
        }

        match url::Url::parse(&self.vpn.url) {
            Ok(url) => match url.scheme() {
                "http" | "https" => {}
                scheme => {
                    return Err(format!(
                        "vpn.url scheme must be http or https, got: {}",
                        scheme
                    ))
                }
            },
            Err(e) => return Err(format!("vpn.url is not a valid URL: {}", e)),
        }

        if self.health_check.host.trim().is_empty() {
            return Err("health_check.host cannot be empty".to_string());
        }
        if self.health_check.port == 0 {
            return Err("health_check.port cannot be zero".to_string());
        }
        if self.health_check.timeout_secs == 0 {
            return Err("health_check.timeout_secs cannot be zero".to_string());
        }

        if self.openconnect.binary.trim().is_empty() {
            return Err("openconnect.binary cannot be empty".to_string());
        }
        if self.openconnect.shutdown_grace_period_secs == 0 {
            return Err("openconnect.shutdown_grace_period_secs cannot be zero".to_string());
        }

        if self.dsid_writer.interval_secs == 0 {
            return Err("dsid_writer.interval_secs cannot be zero".to_string());
        }
        if self.dsid_writer.file.as_os_str().is_empty() {
            return Err("dsid_writer.file cannot be empty".to_string());
        }

        if self.controller.credential_source == CredentialSourceKind::CookieStore {
            self.validate_cookie_store()?;
        }

        Ok(())
    }

    /// Cookie store settings are only required when something reads from it
    pub fn validate_cookie_store(&self) -> Result<(), String> {
        if self.cookie_store.path.as_os_str().is_empty() {
            return Err("cookie_store.path cannot be empty".to_string());
        }
        if self.cookie_store.cookie_name.is_empty() {
            return Err("cookie_store.cookie_name cannot be empty".to_string());
        }
        if self.cookie_store.host.is_empty() {
            return Err("cookie_store.host cannot be empty".to_string());
        }
        Ok(())
    }
}

fn default_interval() -> u64 {
    5
}
fn default_health_grace() -> u64 {
    30
}
fn default_credential_timeout() -> u64 {
    2
}
fn default_probe_timeout() -> u64 {
    2
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_binary() -> String {
    "openconnect".to_string()
}
fn default_cookie_name() -> String {
    "DSID".to_string()
}
fn default_handoff_file() -> PathBuf {
    PathBuf::from("/tmp/ocwatch-dsid")
}
