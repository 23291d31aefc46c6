//! CIM Router - point-to-point and fan-out message delivery.
//!
//! The router is the single path between callers and endpoint sockets:
//! it resolves names through the registry, keeps exactly one live
//! connection per target (exchanges on it are serialized by a mutex),
//! frames bodies with the endpoint's delimiter, and reports failures as
//! typed errors rather than hangs. Broadcast fans out one task per
//! target with independent timeouts, so a silent endpoint costs its own
//! window and nothing more.

pub mod connection;
pub mod router;

pub use connection::Connection;
pub use router::{Deposit, Router};
