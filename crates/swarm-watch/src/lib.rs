//! Debounced, rename-aware file-system watcher for `swarm-sync`.

pub mod echo;
pub mod error;
pub mod events;
pub mod ignore;
pub mod watcher;

pub use echo::EchoSuppressor;
pub use error::{WatchError, WatchResult};
pub use events::WatchEvent;
pub use ignore::IgnorePolicy;
pub use watcher::{DEBOUNCE, FileWatcher};
