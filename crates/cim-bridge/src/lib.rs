//! CIM Bridge - external commands as addressable endpoints.
//!
//! `cim ci-tool -n sage -- some-command` turns any stdin/stdout tool
//! into a named socket endpoint: the bridge spawns the command, binds
//! `ci_msg_<name>.sock`, registers the name, and pumps bytes between
//! the connected client and the child. Message boundaries on the way
//! out are cut at the endpoint's delimiter; inbound bytes pass through
//! verbatim (the delimiter doubles as the child's line terminator).
//!
//! The bridge guarantees cleanup: whatever way the child goes (clean
//! exit, crash, `terminate()`), the socket file is unlinked and the
//! name deregistered.

pub mod bridge;
pub mod pump;

pub use bridge::{BridgeHandle, BridgeSpec, ProcessBridge};
pub use pump::{Frame, FrameScanner, MAX_FRAME_SIZE};
