//! The sync engine: persisted installation state, conflict policy, the
//! tracked-file model, and the running daemon that drives discovery,
//! transport, and the file watcher against them.

pub mod conflict;
pub mod engine;
pub mod error;
pub mod events;
pub mod scan;
pub mod state;
pub mod tombstones;
pub mod tracked;

pub use conflict::{ConflictInput, ConflictMode, Resolution, conflict_copy_name, resolve};
pub use engine::{EngineConfig, EngineHandle, SyncEngine};
pub use error::{ConfigError, ConfigResult, SyncError, SyncResult};
pub use events::{ConflictWinner, EngineEvent, RestoredVersion, SyncStatus};
pub use state::{IgnoreRules, InstallState, Settings, SettingsStore, TrackedCache, ignore_rules_for};
pub use tombstones::TombstoneSet;
pub use tracked::TrackedMap;
