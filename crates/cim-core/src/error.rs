//! The shared failure taxonomy.
//!
//! Every variant is returned as a typed result to the caller; none of
//! them crash the router, registry or bridge. CLI-level callers render
//! a one-line classification plus the target name, never a backtrace.

use std::time::Duration;

use thiserror::Error;

use crate::CiName;

/// Errors surfaced by the communication core.
#[derive(Debug, Error)]
pub enum CommsError {
    /// Registration rejected: duplicate live name, out-of-range port or
    /// invalid name.
    #[error("registration conflict for {name}: {reason}")]
    RegistrationConflict {
        /// Name that failed to register
        name: CiName,
        /// Why registration was rejected
        reason: String,
    },

    /// No live registry record for the name.
    #[error("endpoint not found: {0}")]
    EndpointNotFound(CiName),

    /// The endpoint's socket is missing or its process is dead.
    #[error("connection refused by {name}: {reason}")]
    ConnectionRefused {
        /// Target that refused the connection
        name: CiName,
        /// Underlying cause
        reason: String,
    },

    /// No framed response arrived within the window. The underlying
    /// connection stays open; only the waiter is cancelled.
    #[error("timeout waiting {elapsed:?} for {name}")]
    Timeout {
        /// Target that did not answer in time
        name: CiName,
        /// How long the caller waited
        elapsed: Duration,
    },

    /// A frame exceeded the maximum buffer size before any delimiter
    /// was seen. The oversized buffer is flushed as a frame; this is a
    /// warning to the caller, not a fatal condition.
    #[error("delimiter framing overflow on {name}: {buffered} bytes without a delimiter")]
    DelimiterFraming {
        /// Endpoint whose stream overflowed
        name: CiName,
        /// Bytes accumulated when the limit was hit
        buffered: usize,
    },

    /// The external command could not be launched.
    #[error("failed to spawn {command}: {reason}")]
    ProcessSpawn {
        /// Command that failed to launch
        command: String,
        /// OS-level cause (not found, permission denied, ...)
        reason: String,
    },

    /// Filesystem or socket plumbing failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted state could not be read or written.
    #[error("persistence error: {0}")]
    Persist(String),

    /// The registry actor has shut down.
    #[error("registry channel closed")]
    ChannelClosed,
}

impl CommsError {
    /// Short classification label for CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegistrationConflict { .. } => "registration-conflict",
            Self::EndpointNotFound(_) => "endpoint-not-found",
            Self::ConnectionRefused { .. } => "connection-refused",
            Self::Timeout { .. } => "timeout",
            Self::DelimiterFraming { .. } => "delimiter-framing",
            Self::ProcessSpawn { .. } => "process-spawn-failure",
            Self::Io(_) => "io",
            Self::Persist(_) => "persistence",
            Self::ChannelClosed => "channel-closed",
        }
    }
}

/// Result type for communication operations.
pub type CommsResult<T> = Result<T, CommsError>;
