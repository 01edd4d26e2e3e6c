//! Connection attempt state
//!
//! Accumulates what the log parser has learned about the current openconnect
//! attempt. A fresh value is installed every time the tunnel is started or
//! forcibly killed, so results never leak from one attempt into the next.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What is known about one connection attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionAttemptState {
    pub(crate) success: bool,
    pub(crate) host_addr: String,
    pub(crate) client_addr: String,
    pub(crate) rejected_dsid: String,
    pub(crate) needs_restart: bool,
}

impl ConnectionAttemptState {
    /// Both addresses were seen and the session expiry line committed them
    pub fn success(&self) -> bool {
        self.success
    }

    /// Remote VPN gateway address, empty until seen
    pub fn host_addr(&self) -> &str {
        &self.host_addr
    }

    /// Address assigned to this client, empty until seen
    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }

    /// DSID that was in use when the server refused the cookie
    pub fn rejected_dsid(&self) -> &str {
        &self.rejected_dsid
    }

    /// The tunnel detected a dead peer and should be restarted
    pub fn needs_restart(&self) -> bool {
        self.needs_restart
    }
}

/// Attempt state shared between the stream readers and the supervisor
///
/// All writers go through the same lock.
#[derive(Debug, Clone, Default)]
pub struct SharedAttemptState(Arc<Mutex<ConnectionAttemptState>>);

impl SharedAttemptState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current attempt
    pub fn get(&self) -> ConnectionAttemptState {
        self.lock().clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut ConnectionAttemptState) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionAttemptState> {
        // The state is plain data; a panicking reader cannot leave it half-written.
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_is_empty() {
        let state = SharedAttemptState::new().get();
        assert!(!state.success());
        assert_eq!(state.host_addr(), "");
        assert_eq!(state.client_addr(), "");
        assert_eq!(state.rejected_dsid(), "");
        assert!(!state.needs_restart());
    }

    #[test]
    fn test_clones_share_updates() {
        let state = SharedAttemptState::new();
        let reader = state.clone();
        state.update(|s| s.needs_restart = true);
        assert!(reader.get().needs_restart());
    }
}
