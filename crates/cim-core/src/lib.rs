//! CIM Core - Shared types for CI communication
//!
//! This crate provides the domain types shared between the registry,
//! process bridge, message router and inbox store:
//! - `endpoint` - named, reachable destinations and their lifecycle
//! - `delimiter` - configurable wire-framing byte sequences
//! - `message` - immutable units of communication
//! - `config` - environment-driven timeouts, port ranges and paths
//! - `error` - the typed failure taxonomy shared by all components
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`
//! in non-test code.

pub mod config;
pub mod delimiter;
pub mod endpoint;
pub mod error;
pub mod message;

// Re-exports for convenience
pub use config::CommsConfig;
pub use delimiter::Delimiter;
pub use endpoint::{CiName, Endpoint, EndpointKind, EndpointStatus};
pub use error::{CommsError, CommsResult};
pub use message::Message;
