//! VPN tunnel module
//!
//! Runs the openconnect child, interprets its output and checks that traffic
//! actually flows through the tunnel.

pub mod output_parser;
pub mod process;
pub mod state;

// Reachability through the tunnel
pub mod health_check;

// Public re-exports
pub use health_check::{HealthCheckResult, HealthChecker, HealthProbe};
pub use output_parser::{LogParser, ParsedLine};
pub use process::{StopOutcome, SupervisorSettings, TunnelSupervisor};
pub use state::ConnectionAttemptState;
