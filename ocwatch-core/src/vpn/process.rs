//! openconnect process supervision
//!
//! This module owns the lifecycle of the single openconnect child: spawning
//! it in its own process group, following its output, noticing when it dies,
//! and tearing it down with SIGTERM followed by SIGKILL.

use crate::config::{OpenConnectConfig, VpnConfig};
use crate::dsid::redact;
use crate::error::SupervisorError;
use crate::vpn::output_parser::{LogParser, ParsedLine};
use crate::vpn::state::ConnectionAttemptState;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// How the supervisor launches openconnect
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Executable to run, `openconnect` unless overridden
    pub binary: String,
    /// VPN endpoint passed as the final argument
    pub url: String,
    /// Inserted between the fixed arguments and the URL
    pub extra_args: Vec<String>,
    /// Echo child output into the log
    pub verbose: bool,
    /// Never spawn; only flip the running flag
    pub dry_run: bool,
    /// Time allowed between SIGTERM and SIGKILL
    pub shutdown_grace_period: Duration,
}

impl SupervisorSettings {
    pub fn from_config(vpn: &VpnConfig, openconnect: &OpenConnectConfig) -> Self {
        Self {
            binary: openconnect.binary.clone(),
            url: vpn.url.clone(),
            extra_args: openconnect.extra_args(),
            verbose: openconnect.verbose,
            dry_run: openconnect.dry_run,
            shutdown_grace_period: openconnect.shutdown_grace_period(),
        }
    }
}

/// How a call to [`TunnelSupervisor::stop`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no process to stop
    NotRunning,
    /// The process exited within the grace period
    Exited,
    /// The grace period elapsed and the process group was killed
    Killed,
}

/// Live child bookkeeping
#[derive(Debug)]
struct ChildHandle {
    pid: u32,
    exited: watch::Receiver<bool>,
}

/// Everything the exit waiter and the controller both touch
#[derive(Debug, Default)]
struct ProcessSlot {
    running: bool,
    child: Option<ChildHandle>,
    /// Bumped on every start so a stale waiter cannot clear a newer child
    generation: u64,
}

fn lock_slot(slot: &Mutex<ProcessSlot>) -> MutexGuard<'_, ProcessSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Supervises one openconnect child at a time
///
/// `start`, `stop` and `restart` take `&mut self`: the controller is the only
/// caller. The slot mutex exists for the background exit waiter.
pub struct TunnelSupervisor {
    settings: SupervisorSettings,
    dsid: String,
    slot: Arc<Mutex<ProcessSlot>>,
    parser: LogParser,
    span: Span,
}

impl TunnelSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let span = info_span!("tunnel", url = %settings.url);
        let parser = LogParser::new("", settings.verbose);
        Self {
            settings,
            dsid: String::new(),
            slot: Arc::new(Mutex::new(ProcessSlot::default())),
            parser,
            span,
        }
    }

    /// DSID the next start will use
    pub fn dsid(&self) -> &str {
        &self.dsid
    }

    /// Assign the DSID for the next start; a running child keeps its own
    pub fn set_dsid(&mut self, dsid: impl Into<String>) {
        self.dsid = dsid.into();
    }

    pub fn is_running(&self) -> bool {
        lock_slot(&self.slot).running
    }

    /// PID (and process group id) of the live child
    pub fn pid(&self) -> Option<u32> {
        lock_slot(&self.slot).child.as_ref().map(|c| c.pid)
    }

    /// Snapshot of the current connection attempt
    pub fn attempt_state(&self) -> ConnectionAttemptState {
        self.parser.state()
    }

    /// Parser of the current attempt, for feeding output lines directly
    pub fn log_parser(&self) -> &LogParser {
        &self.parser
    }

    /// The assigned DSID and whether the server refused it in this attempt
    pub fn dsid_status(&self) -> (String, bool) {
        let state = self.parser.state();
        let rejected = !self.dsid.is_empty() && state.rejected_dsid() == self.dsid;
        (self.dsid.clone(), rejected)
    }

    /// Full argument vector for openconnect
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-C".to_string(),
            self.dsid.clone(),
            "--protocol=pulse".to_string(),
        ];
        args.extend(self.settings.extra_args.iter().cloned());
        args.push(self.settings.url.clone());
        args
    }

    /// Start openconnect with the assigned DSID
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        let _enter = self.span.clone().entered();

        if self.dsid.trim().is_empty() {
            return Err(SupervisorError::NoCredential);
        }

        let args = self.command_args();
        let mut slot = lock_slot(&self.slot);
        if slot.running {
            return Err(SupervisorError::AlreadyRunning);
        }

        // Fresh attempt; readers of the previous child keep feeding the old parser.
        self.parser = LogParser::new(self.dsid.clone(), self.settings.verbose);

        if self.settings.dry_run {
            info!(
                dsid = %redact(&self.dsid),
                "[dry run] {} -C <dsid> {}",
                self.settings.binary,
                args[2..].join(" ")
            );
            slot.generation += 1;
            slot.running = true;
            return Ok(());
        }

        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            reason: format!("{}: {}", self.settings.binary, e),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::PipeSetupFailed { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::PipeSetupFailed { stream: "stderr" })?;
        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            reason: "process exited before it could be tracked".to_string(),
        })?;

        let parser = self.parser.clone();
        tokio::spawn(
            pump_lines(stdout, "stdout", move |line| parser.feed_stdout(line))
                .instrument(self.span.clone()),
        );
        let parser = self.parser.clone();
        tokio::spawn(
            pump_lines(stderr, "stderr", move |line| parser.feed_stderr(line))
                .instrument(self.span.clone()),
        );

        let (exited_tx, exited_rx) = watch::channel(false);
        slot.generation += 1;
        let generation = slot.generation;
        slot.running = true;
        slot.child = Some(ChildHandle {
            pid,
            exited: exited_rx,
        });
        drop(slot);

        info!(pid, dsid = %redact(&self.dsid), "openconnect started");

        let waiter_slot = Arc::clone(&self.slot);
        tokio::spawn(
            async move {
                let status = child.wait().await;
                {
                    let mut slot = lock_slot(&waiter_slot);
                    if slot.generation == generation {
                        slot.running = false;
                        slot.child = None;
                    }
                }
                let _ = exited_tx.send(true);

                match status {
                    Ok(status) if status.success() => info!(pid, "openconnect exited"),
                    Ok(status) => warn!(pid, %status, "openconnect exited with error"),
                    Err(e) => error!(pid, "Failed to wait for openconnect: {}", e),
                }
            }
            .instrument(self.span.clone()),
        );

        Ok(())
    }

    /// Stop openconnect, escalating to SIGKILL after the grace period
    pub async fn stop(&mut self) -> StopOutcome {
        let handle = {
            let slot = lock_slot(&self.slot);
            slot.child
                .as_ref()
                .map(|c| (c.pid, c.exited.clone(), slot.generation))
        };

        let Some((pid, mut exited, generation)) = handle else {
            return self.stop_without_child();
        };

        let span = self.span.clone();
        let grace = self.settings.shutdown_grace_period;

        // The child leads its own group, so signalling the group reaches any helpers it forked.
        let pgid = Pid::from_raw(pid as i32);
        span.in_scope(|| {
            info!(pid, "Sending SIGTERM to openconnect process group");
            signal_group(pgid, Signal::SIGTERM);
        });

        let exited_in_time = tokio::time::timeout(grace, exited.wait_for(|done| *done))
            .await
            .is_ok();

        if exited_in_time {
            self.clear_slot(generation);
            span.in_scope(|| info!(pid, "openconnect stopped"));
            return StopOutcome::Exited;
        }

        span.in_scope(|| {
            warn!(pid, grace = ?grace, "openconnect ignored SIGTERM, sending SIGKILL");
            signal_group(pgid, Signal::SIGKILL);
        });
        self.clear_slot(generation);
        // A killed attempt tells us nothing; drop whatever it reported.
        self.parser = LogParser::new(self.dsid.clone(), self.settings.verbose);
        StopOutcome::Killed
    }

    /// `stop` followed by `start`
    pub async fn restart(&mut self) -> Result<(), SupervisorError> {
        self.stop().await;
        self.start()
    }

    /// Dry-run "process" or nothing at all
    fn stop_without_child(&mut self) -> StopOutcome {
        let mut slot = lock_slot(&self.slot);
        if slot.running {
            slot.running = false;
            self.span.in_scope(|| info!("[dry run] openconnect stopped"));
            StopOutcome::Exited
        } else {
            StopOutcome::NotRunning
        }
    }

    fn clear_slot(&self, generation: u64) {
        let mut slot = lock_slot(&self.slot);
        if slot.generation == generation {
            slot.running = false;
            slot.child = None;
        }
    }
}

impl Drop for TunnelSupervisor {
    fn drop(&mut self) {
        if let Some(pid) = self.pid() {
            // kill_on_drop only reaches the direct child; take the whole group down.
            signal_group(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => {}
        Err(Errno::ESRCH) => debug!(%pgid, ?signal, "Process group already gone"),
        Err(e) => warn!(%pgid, ?signal, "Failed to signal process group: {}", e),
    }
}

/// Read a child stream line by line until EOF
async fn pump_lines<R, F>(reader: R, stream: &'static str, feed: F)
where
    R: AsyncRead + Unpin,
    F: Fn(&str) -> ParsedLine,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                feed(line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                warn!(stream, "stream error: {}", e);
                break;
            }
        }
    }
    debug!(stream, "stream closed");
}
