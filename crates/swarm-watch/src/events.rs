use std::path::PathBuf;

/// A debounced, sync-engine-facing change, after rename pairing and ignore
/// filtering have been applied to the raw OS notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    /// The OS notification channel lost events (queue exhaustion); the
    /// receiver should perform a full startup-style rescan.
    RescanRequested,
}

/// The raw per-path kind before debouncing collapses repeated events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawKind {
    Create,
    Modify,
    Delete,
}

