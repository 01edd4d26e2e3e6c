//! Prefix-based parser for openconnect output
//!
//! openconnect offers no structured status channel, so the supervisor follows
//! its human readable output. stdout carries the connection milestones and
//! stderr carries the failures we react to.

use crate::dsid::redact;
use crate::vpn::state::{ConnectionAttemptState, SharedAttemptState};
use tracing::{info, trace, warn};

const CONNECTED_PREFIX: &str = "Connected to ";
const CONFIGURED_PREFIX: &str = "Configured as ";
const SESSION_EXPIRY_PREFIX: &str = "Session authentication will expire at ";
const DEAD_PEER_PREFIX: &str = "ESP detected dead peer";
const COOKIE_REJECTED_PREFIX: &str = "Cookie was rejected by server";

/// Emitted for every unhandled Pulse packet; far too chatty to echo
const PULSE_PACKET_NOISE_PREFIX: &str = "Unknown Pulse packet of ";

/// What a single output line meant to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Remote gateway address recorded
    HostAddress(String),
    /// Client tunnel address recorded
    ClientAddress(String),
    /// Session expiry seen after both addresses; the attempt succeeded
    SessionEstablished,
    /// Session expiry seen but the attempt cannot be marked successful
    SessionIncomplete,
    /// ESP dead peer detection fired
    DeadPeer,
    /// Server refused the DSID cookie
    CookieRejected,
    /// Known high frequency noise, suppressed
    Noise,
    /// Anything else
    Other,
}

/// Feeds openconnect output lines into one attempt's state
#[derive(Debug, Clone)]
pub struct LogParser {
    state: SharedAttemptState,
    dsid: String,
    verbose: bool,
}

impl LogParser {
    /// Create a parser for an attempt made with `dsid`
    pub fn new(dsid: impl Into<String>, verbose: bool) -> Self {
        Self {
            state: SharedAttemptState::new(),
            dsid: dsid.into(),
            verbose,
        }
    }

    /// Snapshot of everything learned so far
    pub fn state(&self) -> ConnectionAttemptState {
        self.state.get()
    }

    /// DSID this attempt was started with
    pub fn dsid(&self) -> &str {
        &self.dsid
    }

    /// Handle one line of openconnect stdout
    pub fn feed_stdout(&self, line: &str) -> ParsedLine {
        self.echo("stdout", line);

        if line.starts_with(CONNECTED_PREFIX) {
            return match line.split(' ').nth(2).map(host_part) {
                Some(host) if !host.is_empty() => {
                    info!("Connected to remote {}", host);
                    self.state.update(|s| s.host_addr = host.to_string());
                    ParsedLine::HostAddress(host.to_string())
                }
                _ => ParsedLine::Other,
            };
        }

        if line.starts_with(CONFIGURED_PREFIX) {
            return match line.split(' ').nth(2).map(|f| f.trim_end_matches(',')) {
                Some(client) if !client.is_empty() => {
                    info!("Configured client as {}", client);
                    self.state.update(|s| s.client_addr = client.to_string());
                    ParsedLine::ClientAddress(client.to_string())
                }
                _ => ParsedLine::Other,
            };
        }

        if line.starts_with(SESSION_EXPIRY_PREFIX) {
            // The expiry line is the commit point; both addresses must already be known.
            let established = self.state.update(|s| {
                if !s.host_addr.is_empty()
                    && !s.client_addr.is_empty()
                    && s.rejected_dsid.is_empty()
                {
                    s.success = true;
                }
                s.success
            });
            if established {
                let state = self.state.get();
                info!(
                    "Successfully connected to remote {} as {}",
                    state.host_addr, state.client_addr
                );
                return ParsedLine::SessionEstablished;
            }
            return ParsedLine::SessionIncomplete;
        }

        ParsedLine::Other
    }

    /// Handle one line of openconnect stderr
    pub fn feed_stderr(&self, line: &str) -> ParsedLine {
        if line.starts_with(PULSE_PACKET_NOISE_PREFIX) {
            return ParsedLine::Noise;
        }
        self.echo("stderr", line);

        if line.starts_with(DEAD_PEER_PREFIX) {
            warn!("openconnect reported a dead peer, restart required");
            self.state.update(|s| s.needs_restart = true);
            return ParsedLine::DeadPeer;
        }

        if line.starts_with(COOKIE_REJECTED_PREFIX) {
            warn!(dsid = %redact(&self.dsid), "DSID cookie rejected by server");
            let dsid = self.dsid.clone();
            self.state.update(|s| s.rejected_dsid = dsid);
            return ParsedLine::CookieRejected;
        }

        ParsedLine::Other
    }

    fn echo(&self, stream: &'static str, line: &str) {
        if self.verbose {
            info!(stream, "{}", line);
        } else {
            trace!(stream, "{}", line);
        }
    }
}

/// Strip the port from `host:port` or `[v6]:port`
fn host_part(field: &str) -> &str {
    let host = match field.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => field,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
