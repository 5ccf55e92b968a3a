//! Framed, mutually authenticated, session-encrypted TCP transport for
//! `swarm-sync`, plus the per-peer connection pool built on top of it.

pub mod error;
pub mod framed;
pub mod handshake;
pub mod listener;
pub mod pool;

pub use error::{TransportError, TransportResult};
pub use framed::{FramedSecureStream, MAX_RECORD_LEN};
pub use handshake::HandshakeOutcome;
pub use listener::Inbound;
pub use pool::{Channel, ConnectionPool};
