//! Suppresses watcher events caused by the sync engine's own writes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Shared between the sync engine (which registers paths it is about to
/// write) and the watcher (which checks and clears them as raw events
/// arrive).
pub struct EchoSuppressor {
    window: Duration,
    registered: Mutex<HashMap<PathBuf, Instant>>,
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl EchoSuppressor {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, registered: Mutex::new(HashMap::new()) }
    }

    /// Called by the sync engine immediately before writing `path` locally
    /// on behalf of a peer.
    pub fn register(&self, path: &Path) {
        self.registered.lock().insert(path.to_path_buf(), Instant::now());
    }

    /// Called by the watcher for every raw event. Returns `true` if the
    /// event should be discarded as an echo of a local write; clears the
    /// entry either way once consumed or expired.
    pub fn should_suppress(&self, path: &Path) -> bool {
        let mut registered = self.registered.lock();
        match registered.remove(path) {
            Some(at) if at.elapsed() <= self.window => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn suppresses_within_window_and_clears_entry() {
        let suppressor = EchoSuppressor::new(Duration::from_secs(5));
        let path = PathBuf::from("/sync/docs/a.txt");
        suppressor.register(&path);

        assert!(suppressor.should_suppress(&path));
        // Entry cleared after first match.
        assert!(!suppressor.should_suppress(&path));
    }

    #[test]
    fn does_not_suppress_after_window_elapses() {
        let suppressor = EchoSuppressor::new(Duration::from_millis(10));
        let path = PathBuf::from("/sync/docs/a.txt");
        suppressor.register(&path);
        std::thread::sleep(Duration::from_millis(20));

        assert!(!suppressor.should_suppress(&path));
    }

    #[test]
    fn unregistered_paths_are_never_suppressed() {
        let suppressor = EchoSuppressor::new(Duration::from_secs(5));
        assert!(!suppressor.should_suppress(&PathBuf::from("/sync/never-written.txt")));
    }
}
