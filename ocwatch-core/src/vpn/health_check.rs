//! Tunnel reachability checking via TCP connect
//!
//! This module provides a HealthChecker that dials a fixed host:port through
//! the tunnel and closes the connection as soon as it is established.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Result of a health check attempt
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    success: bool,
    duration: Duration,
    error: Option<String>,
}

impl HealthCheckResult {
    /// Create a successful health check result
    pub fn success(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            error: None,
        }
    }

    /// Create a failed health check result
    pub fn failure(duration: Duration, error: String) -> Self {
        Self {
            success: false,
            duration,
            error: Some(error),
        }
    }

    /// Check if the health check was successful
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Get the duration of the health check
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Get the error message if the check failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Anything the controller can ask "is the tunnel passing traffic?"
pub trait HealthProbe {
    fn check(&self) -> impl Future<Output = HealthCheckResult> + Send;
}

/// Errors that can occur while building a health checker
#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("Invalid health check endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Performs TCP connect health checks
#[derive(Debug, Clone)]
pub struct HealthChecker {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HealthChecker {
    /// Create a new health checker
    ///
    /// # Arguments
    /// * `host` - Hostname or IP address to dial
    /// * `port` - TCP port to dial
    /// * `timeout` - Maximum duration to wait for the connection
    pub fn new(
        host: impl Into<String>,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, HealthCheckError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(HealthCheckError::InvalidEndpoint(
                "host cannot be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(HealthCheckError::InvalidEndpoint(
                "port cannot be zero".to_string(),
            ));
        }
        Ok(Self {
            host,
            port,
            timeout,
        })
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl HealthProbe for HealthChecker {
    /// Dial the endpoint and drop the connection immediately
    #[tracing::instrument(skip(self), fields(endpoint = %self.endpoint()))]
    async fn check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let dial = TcpStream::connect((self.host.as_str(), self.port));

        match tokio::time::timeout(self.timeout, dial).await {
            Ok(Ok(stream)) => {
                drop(stream);
                let duration = start.elapsed();
                debug!(duration_ms = duration.as_millis(), "Health check succeeded");
                HealthCheckResult::success(duration)
            }
            Ok(Err(e)) => {
                let duration = start.elapsed();
                warn!(error = %e, duration_ms = duration.as_millis(), "Health check failed");
                HealthCheckResult::failure(duration, format!("Connection failed: {}", e))
            }
            Err(_) => {
                let duration = start.elapsed();
                warn!(duration_ms = duration.as_millis(), "Health check timed out");
                HealthCheckResult::failure(
                    duration,
                    format!("Connection timeout after {:?}", self.timeout),
                )
            }
        }
    }
}
