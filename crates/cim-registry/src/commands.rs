//! Registry actor commands.
//!
//! Each command carries a oneshot channel for its response, enabling
//! request-response over the actor's mpsc channel without blocking.

use std::time::Duration;

use tokio::sync::oneshot;

use cim_core::{CiName, CommsResult, Endpoint, EndpointKind, EndpointStatus};

/// Optional predicate for `List`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Keep only endpoints of this kind.
    pub kind: Option<EndpointKind>,

    /// Keep only endpoints in this status.
    pub status: Option<EndpointStatus>,
}

impl ListFilter {
    /// Whether `endpoint` passes the filter.
    pub fn matches(&self, endpoint: &Endpoint) -> bool {
        if let Some(kind) = self.kind {
            if endpoint.kind != kind {
                return false;
            }
        }
        if let Some(status) = self.status {
            if endpoint.status != status {
                return false;
            }
        }
        true
    }
}

/// Commands sent to the registry actor.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a new endpoint.
    ///
    /// Fails with `RegistrationConflict` for a duplicate live name, a
    /// port outside the configured AI range, or an invalid name.
    Register {
        /// The endpoint to register (boxed to reduce enum size variance)
        endpoint: Box<Endpoint>,
        /// Channel to send the result
        respond_to: oneshot::Sender<CommsResult<Endpoint>>,
    },

    /// Resolve a name to its live endpoint record.
    ///
    /// Fails with `EndpointNotFound` for unknown or evicted names.
    Discover {
        /// Name to resolve
        name: CiName,
        /// Channel to send the result
        respond_to: oneshot::Sender<CommsResult<Endpoint>>,
    },

    /// Enumerate live endpoints, optionally filtered by kind/status.
    List {
        /// Filter predicate (default passes everything)
        filter: ListFilter,
        /// Channel to send the results
        respond_to: oneshot::Sender<Vec<Endpoint>>,
    },

    /// Refresh an endpoint's heartbeat (`Registered → Active` on first).
    Heartbeat {
        /// Name to refresh
        name: CiName,
        /// Channel to send the result
        respond_to: oneshot::Sender<CommsResult<()>>,
    },

    /// Record a failed connection attempt (`→ Unreachable`).
    MarkUnreachable {
        /// Name that refused a connection
        name: CiName,
        /// Channel to send the result
        respond_to: oneshot::Sender<CommsResult<()>>,
    },

    /// Record a successful (re)connection (`→ Active`).
    MarkActive {
        /// Name that accepted a connection
        name: CiName,
        /// Channel to send the result
        respond_to: oneshot::Sender<CommsResult<()>>,
    },

    /// Remove an endpoint explicitly (clean process exit).
    Deregister {
        /// Name to remove
        name: CiName,
        /// Channel to send the result
        respond_to: oneshot::Sender<CommsResult<()>>,
    },

    /// Evict endpoints whose heartbeat is older than the window.
    ///
    /// Responds with the number of endpoints evicted.
    Sweep {
        /// Maximum heartbeat age before eviction
        retention_window: Duration,
        /// Channel to send the eviction count
        respond_to: oneshot::Sender<usize>,
    },
}
