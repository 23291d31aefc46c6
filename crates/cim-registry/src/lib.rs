//! CIM Registry - durable name directory for CI endpoints.
//!
//! This crate provides the one piece of state shared by multiple
//! independent actors (bridges registering, routers resolving, the
//! sweep task evicting):
//! - `store` - JSON directory file with atomic write-temp-then-rename
//! - `actor` - single owner of the in-memory directory, driven by commands
//! - `handle` - cloneable async interface injected into router and bridge
//! - `sweep` - periodic retention eviction task
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌────────────────┐  atomic rename  ┌───────────────┐
//! │RegistryHandle│────────────▶│ RegistryActor  │────────────────▶│ registry.json │
//! │ (clone/share)│◀────────────│ (state owner)  │◀────────────────│  (the truth)  │
//! └──────────────┘  oneshot    └────────────────┘  reload         └───────────────┘
//! ```
//!
//! Bridges run in their own processes, so the file is the cross-process
//! source of truth: the actor reloads it before serving each command and
//! persists after each mutation. Readers see the prior or the fully
//! updated file, never a torn record.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()` in non-test code; channel
//! closure maps to `CommsError::ChannelClosed`.

pub mod actor;
pub mod commands;
pub mod handle;
pub mod store;
pub mod sweep;

pub use actor::RegistryActor;
pub use commands::{ListFilter, RegistryCommand};
pub use handle::{spawn_registry, RegistryHandle};
pub use store::RegistryStore;
pub use sweep::spawn_sweep_task;
