//! Remembers local deletions for a grace window so that a peer's
//! manifest — sent before it has heard about the delete — does not cause
//! the file to be resurrected.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Default grace window before a tombstone is purged.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::hours(24);

pub struct TombstoneSet {
    grace_window: Duration,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for TombstoneSet {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_WINDOW)
    }
}

impl TombstoneSet {
    #[must_use]
    pub fn new(grace_window: Duration) -> Self {
        Self { grace_window, entries: Mutex::new(HashMap::new()) }
    }

    pub fn record(&self, path_key: &str) {
        self.entries.lock().insert(path_key.to_string(), Utc::now());
    }

    /// Whether `path_key` was deleted locally within the grace window.
    #[must_use]
    pub fn contains(&self, path_key: &str) -> bool {
        match self.entries.lock().get(path_key) {
            Some(deleted_at) => Utc::now() - *deleted_at <= self.grace_window,
            None => false,
        }
    }

    /// Drop entries whose grace window has elapsed.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        let window = self.grace_window;
        self.entries.lock().retain(|_, deleted_at| now - *deleted_at <= window);
    }

    /// Clear the tombstone for `path_key`, e.g. because it was recreated
    /// locally or a fresh copy arrived from a peer.
    pub fn forget(&self, path_key: &str) {
        self.entries.lock().remove(path_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_deletion_is_tombstoned_within_window() {
        let set = TombstoneSet::new(Duration::hours(24));
        set.record("docs/a.txt");
        assert!(set.contains("docs/a.txt"));
        assert!(!set.contains("docs/b.txt"));
    }

    #[test]
    fn expired_entry_does_not_suppress() {
        let set = TombstoneSet::new(Duration::milliseconds(-1));
        set.record("docs/a.txt");
        assert!(!set.contains("docs/a.txt"));
    }

    #[test]
    fn purge_removes_expired_entries() {
        let set = TombstoneSet::new(Duration::milliseconds(-1));
        set.record("docs/a.txt");
        set.purge_expired();
        assert_eq!(set.entries.lock().len(), 0);
    }

    #[test]
    fn forget_clears_a_tombstone() {
        let set = TombstoneSet::new(Duration::hours(24));
        set.record("docs/a.txt");
        set.forget("docs/a.txt");
        assert!(!set.contains("docs/a.txt"));
    }
}
