//! Block-aligned delta engine and content-addressed versioning store for
//! `swarm-sync`.

pub mod adler32;
pub mod delta;
pub mod error;
pub mod versions;

pub use delta::{BLOCK_SIZE, apply_delta, compute_delta, compute_signatures};
pub use error::{DeltaError, DeltaResult, VersionError, VersionResult};
pub use versions::VersioningStore;
