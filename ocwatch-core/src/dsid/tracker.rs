//! DSID credential tracking
//!
//! Remembers which session cookie is in use and which ones have been burned,
//! so a cookie the server refused (or one that was rotated away) is never
//! handed to openconnect again.

use std::collections::HashMap;

/// Classification of an observed DSID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsidStatus {
    /// Seen before and retired or refused; must not be reused
    Rejected,
    /// Never seen before; it is now the current credential
    Accepted,
    /// Already the current credential
    Active,
}

/// Credential state machine fed by the controller every tick
#[derive(Debug, Clone)]
pub struct DsidTracker {
    rejected: HashMap<String, u32>,
    current: String,
}

impl DsidTracker {
    /// Create a tracker that already treats the empty string as rejected
    pub fn new() -> Self {
        let mut rejected = HashMap::new();
        rejected.insert(String::new(), 1);
        Self {
            rejected,
            current: String::new(),
        }
    }

    /// Record the latest DSID seen in the credential source
    ///
    /// Accepting a new DSID retires the previous one permanently, even though
    /// the server never refused it.
    pub fn notify(&mut self, candidate: &str) -> DsidStatus {
        if candidate == self.current {
            return DsidStatus::Active;
        }

        if let Some(count) = self.rejected.get_mut(candidate) {
            *count += 1;
            return DsidStatus::Rejected;
        }

        let previous = std::mem::replace(&mut self.current, candidate.to_string());
        *self.rejected.entry(previous).or_insert(0) += 1;
        DsidStatus::Accepted
    }

    /// Record that the server refused this DSID
    pub fn reject(&mut self, candidate: &str) {
        *self.rejected.entry(candidate.to_string()).or_insert(0) += 1;
        if self.current == candidate {
            self.current.clear();
        }
    }

    /// The DSID currently considered valid, empty if none
    pub fn current(&self) -> &str {
        &self.current
    }

    /// How many times this DSID has been refused or retired
    pub fn rejection_count(&self, candidate: &str) -> u32 {
        self.rejected.get(candidate).copied().unwrap_or(0)
    }
}

impl Default for DsidTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_string_starts_rejected() {
        let mut tracker = DsidTracker::new();
        assert_eq!(tracker.current(), "");
        assert_eq!(tracker.rejection_count(""), 1);
        // "" == current, so it is reported as the active value
        assert_eq!(tracker.notify(""), DsidStatus::Active);
    }

    #[test]
    fn test_fresh_dsid_is_accepted() {
        let mut tracker = DsidTracker::new();
        assert_eq!(tracker.notify("A"), DsidStatus::Accepted);
        assert_eq!(tracker.current(), "A");
        // the empty placeholder was retired once more
        assert_eq!(tracker.rejection_count(""), 2);
    }

    #[test]
    fn test_repeat_notify_is_active_without_mutation() {
        let mut tracker = DsidTracker::new();
        tracker.notify("A");
        let before = tracker.clone();

        assert_eq!(tracker.notify("A"), DsidStatus::Active);
        assert_eq!(tracker.notify("A"), DsidStatus::Active);
        assert_eq!(tracker.current(), before.current());
        assert_eq!(tracker.rejected, before.rejected);
    }

    #[test]
    fn test_rotation_retires_previous_dsid() {
        let mut tracker = DsidTracker::new();
        tracker.notify("A");
        assert_eq!(tracker.notify("B"), DsidStatus::Accepted);
        assert_eq!(tracker.rejection_count("A"), 1);

        assert_eq!(tracker.notify("A"), DsidStatus::Rejected);
        assert_eq!(tracker.rejection_count("A"), 2);
        assert_eq!(tracker.current(), "B");
    }

    #[test]
    fn test_reject_current_clears_it() {
        let mut tracker = DsidTracker::new();
        tracker.notify("A");
        tracker.reject("A");

        assert_eq!(tracker.current(), "");
        assert_eq!(tracker.notify("A"), DsidStatus::Rejected);
        assert_eq!(tracker.current(), "");
    }

    #[test]
    fn test_reject_other_keeps_current() {
        let mut tracker = DsidTracker::new();
        tracker.notify("A");
        tracker.reject("Z");

        assert_eq!(tracker.current(), "A");
        assert_eq!(tracker.notify("Z"), DsidStatus::Rejected);
    }

    #[test]
    fn test_burned_dsid_never_accepted_again() {
        let sequence = ["A", "B", "A", "C", "B", "A", "D", "C", "E"];
        let mut tracker = DsidTracker::new();
        let mut burned: Vec<String> = Vec::new();

        for (i, dsid) in sequence.iter().enumerate() {
            let previous = tracker.current().to_string();
            let status = tracker.notify(dsid);
            if status == DsidStatus::Accepted {
                assert!(!burned.contains(&dsid.to_string()), "{dsid} re-accepted");
                burned.push(previous);
            }
            if i % 4 == 3 {
                let current = tracker.current().to_string();
                tracker.reject(&current);
                burned.push(current);
            }
        }
    }
}
