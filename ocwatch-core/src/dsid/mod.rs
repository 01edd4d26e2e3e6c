//! DSID credential handling
//!
//! Tracking which session cookies are usable, and where fresh ones come from.

pub mod poller;
pub mod source;
pub mod tracker;

// Public re-exports
pub use poller::{DsidPoller, PollOutcome};
pub use source::{CookieStoreSource, CredentialSource, FileCredentialSource};
pub use tracker::{DsidStatus, DsidTracker};

/// Shorten a DSID for log output
///
/// A DSID is a live session token; logs only ever carry enough of it to tell
/// two values apart.
pub fn redact(dsid: &str) -> String {
    const VISIBLE: usize = 6;
    if dsid.is_empty() {
        return "<none>".to_string();
    }
    match dsid.char_indices().nth(VISIBLE) {
        Some((idx, _)) => format!("{}…", &dsid[..idx]),
        None => dsid.to_string(),
    }
}
