//! Environment-driven configuration.
//!
//! The core never hardcodes ports, timeouts or retention windows at use
//! sites; everything is read here once and injected. Each field has an
//! environment override and a default matching the reference platform
//! (AI port range 45000-50000, 2s connects, 30s responses).

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default base of the AI specialist port range.
pub const DEFAULT_AI_PORT_BASE: u16 = 45_000;

/// Default top of the AI specialist port range (inclusive).
pub const DEFAULT_AI_PORT_MAX: u16 = 50_000;

/// Runtime configuration for the communication core.
#[derive(Debug, Clone, PartialEq)]
pub struct CommsConfig {
    /// Lowest port an endpoint may register.
    pub ai_port_base: u16,

    /// Highest port an endpoint may register (inclusive).
    pub ai_port_max: u16,

    /// How long to wait for a socket connect.
    pub connect_timeout: Duration,

    /// Default wait for one framed response to a send.
    pub response_timeout: Duration,

    /// Per-target cutoff for broadcast (team chat) members.
    pub team_chat_timeout: Duration,

    /// Upper bound for command-execution style exchanges.
    pub execution_timeout: Duration,

    /// Heartbeat age beyond which the sweep evicts an endpoint.
    pub retention_window: Duration,

    /// Root for the registry file and inbox directories.
    pub state_dir: PathBuf,

    /// Where bridge sockets are created (`ci_msg_<name>.sock`).
    pub socket_dir: PathBuf,
}

impl CommsConfig {
    /// Loads configuration from the environment, falling back to
    /// defaults for anything unset or unparseable (a malformed value
    /// logs a warning rather than failing startup).
    pub fn from_env() -> Self {
        Self {
            ai_port_base: env_parse("CIM_AI_PORT_BASE", DEFAULT_AI_PORT_BASE),
            ai_port_max: env_parse("CIM_AI_PORT_MAX", DEFAULT_AI_PORT_MAX),
            connect_timeout: Duration::from_millis(env_parse("CIM_CONNECT_TIMEOUT_MS", 2_000u64)),
            response_timeout: Duration::from_millis(env_parse(
                "CIM_RESPONSE_TIMEOUT_MS",
                30_000u64,
            )),
            team_chat_timeout: Duration::from_millis(env_parse(
                "CIM_TEAM_CHAT_TIMEOUT_MS",
                2_000u64,
            )),
            execution_timeout: Duration::from_millis(env_parse(
                "CIM_EXECUTION_TIMEOUT_MS",
                120_000u64,
            )),
            retention_window: Duration::from_secs(env_parse("CIM_RETENTION_WINDOW_SECS", 86_400u64)),
            state_dir: env::var("CIM_STATE_DIR").map(PathBuf::from).unwrap_or_else(|_| {
                dirs::state_dir()
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join("cim")
            }),
            socket_dir: env::var("CIM_SOCKET_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp")),
        }
    }

    /// Whether `port` falls inside the configured AI port range.
    pub fn port_in_range(&self, port: u16) -> bool {
        port >= self.ai_port_base && port <= self.ai_port_max
    }

    /// Deterministic port slot for a bridge endpoint, derived from its
    /// name. Bridges are reached over their Unix socket; the slot only
    /// keeps the registry record inside the valid range.
    pub fn derived_port(&self, name: &str) -> u16 {
        // An inverted range from a misconfigured environment falls
        // back to the defaults instead of underflowing
        let (base, max) = if self.ai_port_base <= self.ai_port_max {
            (self.ai_port_base, self.ai_port_max)
        } else {
            warn!(
                base = self.ai_port_base,
                max = self.ai_port_max,
                "AI port base above max, using default range"
            );
            (DEFAULT_AI_PORT_BASE, DEFAULT_AI_PORT_MAX)
        };
        let span = u32::from(max - base) + 1;
        // FNV-1a, small and stable across runs
        let mut hash: u32 = 0x811c_9dc5;
        for byte in name.bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        // span <= 65536 so the remainder fits a u16
        base + (hash % span) as u16
    }

    /// Path of the persisted registry directory file.
    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("registry.json")
    }

    /// Root of the inbox tree.
    pub fn inbox_root(&self) -> PathBuf {
        self.state_dir.join("inboxes")
    }

    /// Socket path for a bridge endpoint name.
    pub fn bridge_socket_path(&self, name: &str) -> PathBuf {
        self.socket_dir.join(format!("ci_msg_{name}.sock"))
    }
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            ai_port_base: DEFAULT_AI_PORT_BASE,
            ai_port_max: DEFAULT_AI_PORT_MAX,
            connect_timeout: Duration::from_millis(2_000),
            response_timeout: Duration::from_millis(30_000),
            team_chat_timeout: Duration::from_millis(2_000),
            execution_timeout: Duration::from_millis(120_000),
            retention_window: Duration::from_secs(86_400),
            state_dir: PathBuf::from("/tmp/cim"),
            socket_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Parses an environment variable, falling back to `default` when the
/// variable is unset or malformed.
fn env_parse<T: std::str::FromStr + Copy>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(var, raw, "Unparseable value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommsConfig::default();
        assert_eq!(config.ai_port_base, 45_000);
        assert_eq!(config.ai_port_max, 50_000);
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.response_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_port_in_range() {
        let config = CommsConfig::default();
        assert!(config.port_in_range(45_000));
        assert!(config.port_in_range(50_000));
        assert!(config.port_in_range(47_123));
        assert!(!config.port_in_range(44_999));
        assert!(!config.port_in_range(50_001));
        assert!(!config.port_in_range(8_080));
    }

    #[test]
    fn test_derived_port_stable_and_in_range() {
        let config = CommsConfig::default();
        let a = config.derived_port("test-echo");
        let b = config.derived_port("test-echo");
        assert_eq!(a, b);
        assert!(config.port_in_range(a));
    }

    #[test]
    fn test_derived_port_survives_inverted_range() {
        let config = CommsConfig {
            ai_port_base: 50_000,
            ai_port_max: 45_000,
            ..CommsConfig::default()
        };
        let port = config.derived_port("test-echo");
        assert!((DEFAULT_AI_PORT_BASE..=DEFAULT_AI_PORT_MAX).contains(&port));
    }

    #[test]
    fn test_derived_port_varies_by_name() {
        let config = CommsConfig::default();
        // Not guaranteed in general, but these shouldn't collide
        assert_ne!(config.derived_port("apollo"), config.derived_port("numa"));
    }

    #[test]
    fn test_paths() {
        let config = CommsConfig::default();
        assert_eq!(config.registry_path(), PathBuf::from("/tmp/cim/registry.json"));
        assert_eq!(config.inbox_root(), PathBuf::from("/tmp/cim/inboxes"));
        assert_eq!(
            config.bridge_socket_path("test-cat"),
            PathBuf::from("/tmp/ci_msg_test-cat.sock")
        );
    }
}
