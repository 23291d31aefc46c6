//! Registry actor - owns the endpoint directory and processes commands.
//!
//! The actor is the single in-process owner of directory state. It
//! receives commands via an mpsc channel and serializes all mutation.
//! Because bridges and CLI invocations run in separate OS processes,
//! the persisted file is the cross-process truth: the actor reloads it
//! before serving each command and persists after each mutation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use cim_core::{CiName, CommsConfig, CommsError, CommsResult, Endpoint, EndpointStatus};

use crate::commands::{ListFilter, RegistryCommand};
use crate::store::RegistryStore;

/// The registry actor - owns the endpoint directory.
///
/// # Thread Safety
///
/// The actor runs in a single task and processes commands sequentially.
/// All state mutations happen within this single task.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Persisted directory file
    store: RegistryStore,

    /// Live directory: name → endpoint
    directory: HashMap<CiName, Endpoint>,

    /// Port range validation source
    config: CommsConfig,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        store: RegistryStore,
        config: CommsConfig,
    ) -> Self {
        let directory = store.load();
        Self {
            receiver,
            store,
            directory,
            config,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all handles dropped).
    pub async fn run(mut self) {
        info!(endpoints = self.directory.len(), "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            // Pick up registrations made by other processes
            self.directory = self.store.load();
            self.handle_command(cmd);
        }

        info!(endpoints = self.directory.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register { endpoint, respond_to } => {
                let result = self.handle_register(*endpoint);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Discover { name, respond_to } => {
                let _ = respond_to.send(self.handle_discover(&name));
            }
            RegistryCommand::List { filter, respond_to } => {
                let _ = respond_to.send(self.handle_list(filter));
            }
            RegistryCommand::Heartbeat { name, respond_to } => {
                let _ = respond_to.send(self.handle_heartbeat(&name));
            }
            RegistryCommand::MarkUnreachable { name, respond_to } => {
                let _ = respond_to.send(self.handle_set_status(&name, EndpointStatus::Unreachable));
            }
            RegistryCommand::MarkActive { name, respond_to } => {
                let _ = respond_to.send(self.handle_set_status(&name, EndpointStatus::Active));
            }
            RegistryCommand::Deregister { name, respond_to } => {
                let _ = respond_to.send(self.handle_deregister(&name));
            }
            RegistryCommand::Sweep {
                retention_window,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_sweep(retention_window));
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles endpoint registration.
    fn handle_register(&mut self, endpoint: Endpoint) -> CommsResult<Endpoint> {
        let name = endpoint.name.clone();

        if CiName::parse(name.as_str()).is_none() {
            return Err(CommsError::RegistrationConflict {
                name,
                reason: "invalid name (empty, path separator or whitespace)".to_string(),
            });
        }

        if !self.config.port_in_range(endpoint.port) {
            return Err(CommsError::RegistrationConflict {
                name,
                reason: format!(
                    "port {} outside AI range {}-{}",
                    endpoint.port, self.config.ai_port_base, self.config.ai_port_max
                ),
            });
        }

        if self.directory.contains_key(&name) {
            debug!(name = %name, "Duplicate registration rejected");
            return Err(CommsError::RegistrationConflict {
                name,
                reason: "name already registered".to_string(),
            });
        }

        self.directory.insert(name.clone(), endpoint.clone());
        self.persist()?;

        info!(
            name = %name,
            kind = %endpoint.kind,
            port = endpoint.port,
            pid = ?endpoint.pid,
            total = self.directory.len(),
            "Endpoint registered"
        );

        Ok(endpoint)
    }

    /// Handles name resolution.
    fn handle_discover(&self, name: &CiName) -> CommsResult<Endpoint> {
        self.directory
            .get(name)
            .filter(|ep| ep.status != EndpointStatus::Evicted)
            .cloned()
            .ok_or_else(|| CommsError::EndpointNotFound(name.clone()))
    }

    /// Handles filtered enumeration.
    fn handle_list(&self, filter: ListFilter) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .directory
            .values()
            .filter(|ep| ep.status != EndpointStatus::Evicted)
            .filter(|ep| filter.matches(ep))
            .cloned()
            .collect();
        // Stable output order for callers and tests
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));
        endpoints
    }

    /// Handles a heartbeat refresh.
    fn handle_heartbeat(&mut self, name: &CiName) -> CommsResult<()> {
        let endpoint = self
            .directory
            .get_mut(name)
            .ok_or_else(|| CommsError::EndpointNotFound(name.clone()))?;

        endpoint.record_heartbeat();
        let status = endpoint.status;
        self.persist()?;

        debug!(name = %name, status = %status, "Heartbeat recorded");
        Ok(())
    }

    /// Handles router-driven status transitions.
    fn handle_set_status(&mut self, name: &CiName, status: EndpointStatus) -> CommsResult<()> {
        let endpoint = self
            .directory
            .get_mut(name)
            .ok_or_else(|| CommsError::EndpointNotFound(name.clone()))?;

        if endpoint.status == status {
            return Ok(());
        }

        let previous = endpoint.status;
        endpoint.status = status;
        if status == EndpointStatus::Active {
            endpoint.last_heartbeat = Utc::now();
        }
        self.persist()?;

        info!(name = %name, from = %previous, to = %status, "Endpoint status changed");
        Ok(())
    }

    /// Handles explicit removal.
    fn handle_deregister(&mut self, name: &CiName) -> CommsResult<()> {
        if self.directory.remove(name).is_none() {
            return Err(CommsError::EndpointNotFound(name.clone()));
        }
        self.persist()?;

        info!(
            name = %name,
            remaining = self.directory.len(),
            "Endpoint deregistered"
        );
        Ok(())
    }

    /// Handles retention eviction.
    ///
    /// Evicted endpoints leave the live directory entirely; the log
    /// line is their historical trace.
    fn handle_sweep(&mut self, retention_window: Duration) -> usize {
        let now = Utc::now();

        let stale: Vec<CiName> = self
            .directory
            .iter()
            .filter(|(_, ep)| ep.is_stale(retention_window, now))
            .map(|(name, _)| name.clone())
            .collect();

        if stale.is_empty() {
            debug!("Sweep found no stale endpoints");
            return 0;
        }

        for name in &stale {
            if let Some(endpoint) = self.directory.remove(name) {
                let age = now
                    .signed_duration_since(endpoint.last_heartbeat)
                    .num_seconds();
                info!(
                    name = %name,
                    kind = %endpoint.kind,
                    heartbeat_age_secs = age,
                    "Endpoint evicted by retention sweep"
                );
            }
        }

        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist after sweep");
        }

        stale.len()
    }

    /// Persists the directory after a mutation.
    fn persist(&self) -> CommsResult<()> {
        self.store.save(&self.directory)
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of live endpoints.
    #[cfg(test)]
    pub fn endpoint_count(&self) -> usize {
        self.directory.len()
    }
}
