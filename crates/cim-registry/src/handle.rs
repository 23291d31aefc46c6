//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone interface injected into the
//! router and bridges; all mutation of the directory funnels through it
//! rather than through any ambient global.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use cim_core::{CiName, CommsConfig, CommsError, CommsResult, Endpoint};

use crate::actor::RegistryActor;
use crate::commands::{ListFilter, RegistryCommand};
use crate::store::RegistryStore;

/// Command channel depth. Registry traffic is low-rate control traffic.
const COMMAND_BUFFER: usize = 32;

/// Handle for interacting with the registry actor.
///
/// Clone freely; all methods are async and communicate with the actor
/// via channels. Channel closure (actor shut down) surfaces as
/// `CommsError::ChannelClosed`.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Creates a handle from a command sender.
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Register an endpoint.
    ///
    /// # Errors
    ///
    /// - `CommsError::RegistrationConflict` for duplicate names,
    ///   out-of-range ports or invalid names
    /// - `CommsError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, endpoint: Endpoint) -> CommsResult<Endpoint> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Register {
                endpoint: Box::new(endpoint),
                respond_to: tx,
            })
            .await
            .map_err(|_| CommsError::ChannelClosed)?;
        rx.await.map_err(|_| CommsError::ChannelClosed)?
    }

    /// Resolve a name to its live endpoint.
    ///
    /// # Errors
    ///
    /// - `CommsError::EndpointNotFound` for unknown or evicted names
    /// - `CommsError::ChannelClosed` if the actor has shut down
    pub async fn discover(&self, name: &CiName) -> CommsResult<Endpoint> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::Discover {
                name: name.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| CommsError::ChannelClosed)?;
        rx.await.map_err(|_| CommsError::ChannelClosed)?
    }

    /// Enumerate live endpoints.
    ///
    /// Returns an empty vector if the actor has shut down.
    pub async fn list(&self, filter: ListFilter) -> Vec<Endpoint> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RegistryCommand::List {
                filter,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Refresh an endpoint's heartbeat.
    pub async fn heartbeat(&self, name: &CiName) -> CommsResult<()> {
        self.simple(|respond_to| RegistryCommand::Heartbeat {
            name: name.clone(),
            respond_to,
        })
        .await
    }

    /// Record a failed connection attempt.
    pub async fn mark_unreachable(&self, name: &CiName) -> CommsResult<()> {
        self.simple(|respond_to| RegistryCommand::MarkUnreachable {
            name: name.clone(),
            respond_to,
        })
        .await
    }

    /// Record a successful (re)connection.
    pub async fn mark_active(&self, name: &CiName) -> CommsResult<()> {
        self.simple(|respond_to| RegistryCommand::MarkActive {
            name: name.clone(),
            respond_to,
        })
        .await
    }

    /// Remove an endpoint explicitly.
    pub async fn deregister(&self, name: &CiName) -> CommsResult<()> {
        self.simple(|respond_to| RegistryCommand::Deregister {
            name: name.clone(),
            respond_to,
        })
        .await
    }

    /// Evict endpoints whose heartbeat is older than the window.
    ///
    /// Returns the number evicted, or 0 if the actor has shut down.
    pub async fn sweep(&self, retention_window: Duration) -> usize {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RegistryCommand::Sweep {
                retention_window,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Sends a unit-result command and awaits its response.
    async fn simple<F>(&self, make: F) -> CommsResult<()>
    where
        F: FnOnce(oneshot::Sender<CommsResult<()>>) -> RegistryCommand,
    {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(make(tx))
            .await
            .map_err(|_| CommsError::ChannelClosed)?;
        rx.await.map_err(|_| CommsError::ChannelClosed)?
    }
}

/// Spawns the registry actor and returns a handle to it.
///
/// The directory is persisted at `config.registry_path()`.
pub fn spawn_registry(config: &CommsConfig) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let store = RegistryStore::new(config.registry_path());
    let actor = RegistryActor::new(rx, store, config.clone());
    tokio::spawn(actor.run());
    RegistryHandle::new(tx)
}
