//! CIM Inbox - durable per-endpoint message queues.
//!
//! Every endpoint owns two queues: `new` (unprocessed messages, drained
//! FIFO) and `keep` (pinned messages, read most-recent-first). Entries
//! are one JSON file each under
//! `<root>/<endpoint>/<category>/<seq>_<id>.json`; the zero-padded
//! monotonic sequence prefix makes lexicographic order equal insertion
//! order, so readers in other processes can walk the queue with nothing
//! but a directory listing.
//!
//! The router deposits responses here; the CLI drains. Direct `push`
//! bypasses the router by design (operator injection).

pub mod entry;
pub mod store;

pub use entry::{Category, InboxEntry};
pub use store::InboxStore;
