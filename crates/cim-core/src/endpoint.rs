//! Endpoint domain entities and value objects.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Delimiter;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Logical name of a CI endpoint.
///
/// Case-sensitive and immutable once registered. Names double as file
/// and socket path components (`ci_msg_<name>.sock`, inbox directories),
/// so they must be non-empty and free of path separators and whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiName(String);

impl CiName {
    /// Creates a CiName without validation.
    ///
    /// Use [`CiName::parse`] at trust boundaries (registration, CLI input);
    /// this constructor is for names already known to be valid.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parses and validates a name.
    ///
    /// Returns `None` if the name is empty or contains `/`, `\` or
    /// whitespace.
    pub fn parse(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.is_empty() {
            return None;
        }
        if name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return None;
        }
        Some(Self(name))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CiName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CiName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CiName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for CiName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Endpoint Kind & Status
// ============================================================================

/// What stands behind a registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    /// A component-hosted AI specialist listening on a TCP port.
    Specialist,

    /// An external command-line tool wrapped by a process bridge,
    /// reachable over a Unix socket.
    ToolBridge,

    /// An interactive terminal shell.
    Terminal,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specialist => write!(f, "specialist"),
            Self::ToolBridge => write!(f, "tool-bridge"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

impl EndpointKind {
    /// Parses a kind from its kebab-case display form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "specialist" => Some(Self::Specialist),
            "tool-bridge" => Some(Self::ToolBridge),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }
}

/// Lifecycle state of a registered endpoint.
///
/// Transitions:
/// `Registered → Active` on first heartbeat,
/// `Active → Unreachable` on connection failure,
/// `Unreachable → Active` on successful reconnect,
/// anything `→ Evicted` via retention sweep or deregistration.
/// `Evicted` is terminal; the name may only be re-registered fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Registered but not yet heartbeated.
    Registered,

    /// Alive and answering heartbeats.
    Active,

    /// Last connection attempt failed; may recover.
    Unreachable,

    /// Removed by retention sweep or deregistration. Terminal.
    Evicted,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Active => write!(f, "active"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Evicted => write!(f, "evicted"),
        }
    }
}

impl EndpointStatus {
    /// Parses a status from its lowercase display form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registered" => Some(Self::Registered),
            "active" => Some(Self::Active),
            "unreachable" => Some(Self::Unreachable),
            "evicted" => Some(Self::Evicted),
            _ => None,
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A named, reachable destination in the CI directory.
///
/// Specialists and terminals are addressed as TCP `host:port`;
/// tool bridges carry a `socket_path` and are addressed over a Unix
/// socket (the port is then a directory slot, not a bind address).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique logical name (case-sensitive, immutable once registered).
    pub name: CiName,

    /// Network host for TCP-addressed endpoints.
    pub host: String,

    /// Port within the configured AI port range.
    pub port: u16,

    /// What stands behind this name.
    pub kind: EndpointKind,

    /// Current lifecycle state.
    pub status: EndpointStatus,

    /// Child process id. Present only for `ToolBridge` endpoints and
    /// owned exclusively by the bridge that spawned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Byte sequence framing messages on this endpoint's socket.
    pub delimiter: Delimiter,

    /// Unix socket path for `ToolBridge` endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// When the endpoint was registered.
    pub registered_at: DateTime<Utc>,

    /// Last heartbeat, used by the retention sweep.
    pub last_heartbeat: DateTime<Utc>,
}

impl Endpoint {
    /// Creates a freshly registered endpoint.
    pub fn new(name: CiName, host: impl Into<String>, port: u16, kind: EndpointKind) -> Self {
        let now = Utc::now();
        Self {
            name,
            host: host.into(),
            port,
            kind,
            status: EndpointStatus::Registered,
            pid: None,
            delimiter: Delimiter::default(),
            socket_path: None,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    /// Sets the framing delimiter (builder-style).
    #[must_use]
    pub fn with_delimiter(mut self, delimiter: Delimiter) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sets the child process id (builder-style, `ToolBridge` only).
    #[must_use]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Sets the Unix socket path (builder-style, `ToolBridge` only).
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Refreshes the heartbeat timestamp.
    ///
    /// A first heartbeat promotes `Registered → Active`; heartbeats do
    /// not resurrect `Unreachable` or `Evicted` endpoints (reconnect and
    /// re-registration do that respectively).
    pub fn record_heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
        if self.status == EndpointStatus::Registered {
            self.status = EndpointStatus::Active;
        }
    }

    /// Whether the endpoint can be a broadcast target.
    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }

    /// Whether the last heartbeat is older than `window`.
    pub fn is_stale(&self, window: std::time::Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now.signed_duration_since(self.last_heartbeat) > window,
            // A window too large for chrono means nothing is ever stale
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ci_name_parse_rejects_bad_names() {
        assert!(CiName::parse("").is_none());
        assert!(CiName::parse("has space").is_none());
        assert!(CiName::parse("has/slash").is_none());
        assert!(CiName::parse("has\\backslash").is_none());
        assert!(CiName::parse("tab\there").is_none());
    }

    #[test]
    fn test_ci_name_parse_accepts_good_names() {
        assert_eq!(CiName::parse("apollo").map(|n| n.to_string()), Some("apollo".to_string()));
        assert!(CiName::parse("test-echo_2").is_some());
    }

    #[test]
    fn test_ci_name_case_sensitive() {
        assert_ne!(CiName::new("Apollo"), CiName::new("apollo"));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EndpointKind::Specialist,
            EndpointKind::ToolBridge,
            EndpointKind::Terminal,
        ] {
            assert_eq!(EndpointKind::parse(&kind.to_string()), Some(kind));
        }
        assert_eq!(EndpointKind::parse("bogus"), None);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            EndpointStatus::Registered,
            EndpointStatus::Active,
            EndpointStatus::Unreachable,
            EndpointStatus::Evicted,
        ] {
            assert_eq!(EndpointStatus::parse(&status.to_string()), Some(status));
        }
    }

    #[test]
    fn test_heartbeat_promotes_registered_to_active() {
        let mut ep = Endpoint::new(CiName::new("numa"), "localhost", 45001, EndpointKind::Specialist);
        assert_eq!(ep.status, EndpointStatus::Registered);

        ep.record_heartbeat();
        assert_eq!(ep.status, EndpointStatus::Active);
    }

    #[test]
    fn test_heartbeat_does_not_resurrect_unreachable() {
        let mut ep = Endpoint::new(CiName::new("numa"), "localhost", 45001, EndpointKind::Specialist);
        ep.status = EndpointStatus::Unreachable;

        ep.record_heartbeat();
        assert_eq!(ep.status, EndpointStatus::Unreachable);
    }

    #[test]
    fn test_staleness_window() {
        let mut ep = Endpoint::new(CiName::new("numa"), "localhost", 45001, EndpointKind::Specialist);
        ep.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);

        assert!(ep.is_stale(std::time::Duration::from_secs(60), Utc::now()));
        assert!(!ep.is_stale(std::time::Duration::from_secs(300), Utc::now()));
    }

    #[test]
    fn test_endpoint_serde_round_trip() {
        let ep = Endpoint::new(CiName::new("test-cat"), "localhost", 45002, EndpointKind::ToolBridge)
            .with_pid(4242)
            .with_socket_path("/tmp/ci_msg_test-cat.sock");

        let json = serde_json::to_string(&ep).expect("serialize");
        let back: Endpoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ep, back);
    }

    #[test]
    fn test_pid_omitted_for_specialists() {
        let ep = Endpoint::new(CiName::new("numa"), "localhost", 45001, EndpointKind::Specialist);
        let json = serde_json::to_string(&ep).expect("serialize");
        assert!(!json.contains("pid"));
        assert!(!json.contains("socket_path"));
    }
}
