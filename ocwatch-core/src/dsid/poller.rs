//! DSID handoff writer
//!
//! Polls a credential source (normally the browser cookie store) and mirrors
//! each new DSID into the handoff file that the controller reads. Keeping the
//! browser access in a separate process lets the watchdog itself run as root
//! without touching a user profile.

use crate::dsid::redact;
use crate::dsid::source::CredentialSource;
use crate::error::CredentialError;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of one poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new DSID was written to the handoff file
    Written,
    /// The source still reports the DSID written last time
    Unchanged,
    /// The source or the write failed; retried next interval
    Failed,
}

/// Copies fresh DSIDs from a source into the handoff file
pub struct DsidPoller<S> {
    source: S,
    handoff_file: PathBuf,
    last_dsid: String,
}

impl<S: CredentialSource> DsidPoller<S> {
    pub fn new(source: S, handoff_file: impl Into<PathBuf>) -> Self {
        Self {
            source,
            handoff_file: handoff_file.into(),
            last_dsid: String::new(),
        }
    }

    /// Poll the source once and write the DSID if it changed
    pub async fn poll_and_save(&mut self) -> PollOutcome {
        let dsid = match self.source.get().await {
            Ok(dsid) => dsid,
            Err(e) => {
                debug!("DSID not available: {}", e);
                return PollOutcome::Failed;
            }
        };

        if dsid == self.last_dsid {
            return PollOutcome::Unchanged;
        }

        info!(
            new_dsid = %redact(&dsid),
            old_dsid = %redact(&self.last_dsid),
            file = %self.handoff_file.display(),
            "Found new DSID, writing handoff file"
        );

        match write_handoff(&self.handoff_file, &dsid) {
            Ok(()) => {
                self.last_dsid = dsid;
                PollOutcome::Written
            }
            Err(e) => {
                warn!(file = %self.handoff_file.display(), "Failed to write DSID: {}", e);
                PollOutcome::Failed
            }
        }
    }

    /// Poll forever on a fixed interval
    pub async fn run(mut self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_and_save().await;
        }
    }
}

/// Write the DSID with owner-only permissions
fn write_handoff(path: &Path, dsid: &str) -> Result<(), CredentialError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(dsid.as_bytes())?;
    Ok(())
}
