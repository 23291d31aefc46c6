//! Send and broadcast.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use cim_core::{CiName, CommsConfig, CommsError, CommsResult, Endpoint, EndpointStatus, Message};
use cim_inbox::{Category, InboxEntry, InboxStore};
use cim_registry::{ListFilter, RegistryHandle};

use crate::connection::Connection;

/// Where to file a response after a successful send.
#[derive(Debug, Clone)]
pub struct Deposit {
    /// Inbox owner
    pub endpoint: CiName,

    /// Queue within that inbox
    pub category: Category,
}

struct RouterInner {
    registry: RegistryHandle,
    inbox: InboxStore,
    config: CommsConfig,
    origin: CiName,
    /// One connection slot per target; the per-name mutex serializes
    /// opening and exchanging. The table lock is only held for the
    /// slot lookup, so a slow connect to one target never delays
    /// traffic to any other.
    connections: Mutex<HashMap<CiName, Arc<Mutex<Option<Connection>>>>>,
}

/// Routes messages to registered endpoints.
///
/// Cloning is cheap and clones share the connection table, so every
/// send to a given target goes over the same serialized connection.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Creates a router sending as `origin`.
    pub fn new(
        registry: RegistryHandle,
        inbox: InboxStore,
        config: CommsConfig,
        origin: CiName,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                registry,
                inbox,
                config,
                origin,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Sends `body` to `target` and returns the framed response.
    ///
    /// Resolution, connection reuse and framing are handled here; the
    /// caller sees only the response text or a typed failure. With a
    /// `deposit`, the response is also appended to the chosen inbox.
    ///
    /// # Errors
    ///
    /// - `EndpointNotFound` if the name is not live
    /// - `ConnectionRefused` if the target cannot be reached
    /// - `Timeout` if no response arrives within `window`
    ///   (default `response_timeout`)
    pub async fn send(
        &self,
        target: &CiName,
        body: &str,
        window: Option<Duration>,
        deposit: Option<Deposit>,
    ) -> CommsResult<String> {
        let message = Message::new(self.inner.origin.clone(), target.clone(), body);
        let window = window.unwrap_or(self.inner.config.response_timeout);
        debug!(
            target = %target,
            correlation_id = %message.correlation_id,
            window_ms = window.as_millis() as u64,
            "Routing send"
        );

        let endpoint = self.inner.registry.discover(target).await?;
        let slot = self.slot_for(target).await;

        let result = {
            let mut guard = slot.lock().await;
            let conn = match guard.take() {
                Some(conn) => guard.insert(conn),
                None => guard.insert(self.open_connection(&endpoint).await?),
            };
            let result = conn.exchange(&message.body, window).await;
            if matches!(result, Err(CommsError::ConnectionRefused { .. })) {
                // Dead connection; reconnect next time
                *guard = None;
            }
            result
        };

        match result {
            Ok(response) => {
                debug!(
                    target = %target,
                    correlation_id = %message.correlation_id,
                    response_len = response.len(),
                    "Send completed"
                );
                if let Some(deposit) = deposit {
                    self.deposit(target, &deposit, &response).await;
                }
                Ok(response)
            }
            Err(e @ CommsError::ConnectionRefused { .. }) => {
                let _ = self.inner.registry.mark_unreachable(target).await;
                Err(e)
            }
            // A timeout leaves the connection open; its late response
            // is drained by the next exchange
            Err(e) => Err(e),
        }
    }

    /// Fans `body` out to every target concurrently.
    ///
    /// Each target gets its own task and its own `window` (default
    /// `team_chat_timeout`); one silent target never delays or fails
    /// the others. The map holds one outcome per distinct target.
    pub async fn broadcast(
        &self,
        targets: &[CiName],
        body: &str,
        window: Option<Duration>,
    ) -> BTreeMap<CiName, CommsResult<String>> {
        let window = window.unwrap_or(self.inner.config.team_chat_timeout);
        let message = Message::to_many(self.inner.origin.clone(), targets.to_vec(), body);
        debug!(
            targets = targets.len(),
            correlation_id = %message.correlation_id,
            "Routing broadcast"
        );

        let mut set = JoinSet::new();
        let mut results = BTreeMap::new();
        for target in targets {
            if results.contains_key(target) {
                continue;
            }
            // Placeholder overwritten by the task outcome; keeps the
            // dedup check purely map-based
            results.insert(
                target.clone(),
                Err(CommsError::EndpointNotFound(target.clone())),
            );

            let router = self.clone();
            let target = target.clone();
            let body = message.body.clone();
            set.spawn(async move {
                let outcome = router.send(&target, &body, Some(window), None).await;
                (target, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((target, outcome)) => {
                    results.insert(target, outcome);
                }
                Err(e) => warn!(error = %e, "Broadcast task failed"),
            }
        }
        results
    }

    /// Broadcast to every `Active` endpoint (the team-chat surface).
    pub async fn broadcast_active(
        &self,
        body: &str,
        window: Option<Duration>,
    ) -> BTreeMap<CiName, CommsResult<String>> {
        let targets: Vec<CiName> = self
            .inner
            .registry
            .list(ListFilter {
                kind: None,
                status: Some(EndpointStatus::Active),
            })
            .await
            .into_iter()
            .map(|endpoint| endpoint.name)
            .collect();
        self.broadcast(&targets, body, window).await
    }

    /// Returns the connection slot for a target, creating an empty one
    /// on first contact. Holds the table lock only for the lookup.
    async fn slot_for(&self, name: &CiName) -> Arc<Mutex<Option<Connection>>> {
        let mut connections = self.inner.connections.lock().await;
        connections.entry(name.clone()).or_default().clone()
    }

    /// Opens a connection; connect outcomes drive the registry status.
    async fn open_connection(&self, endpoint: &Endpoint) -> CommsResult<Connection> {
        match Connection::open(endpoint, self.inner.config.connect_timeout).await {
            Ok(conn) => {
                if endpoint.status != EndpointStatus::Active {
                    let _ = self.inner.registry.mark_active(&endpoint.name).await;
                }
                Ok(conn)
            }
            Err(e) => {
                let _ = self.inner.registry.mark_unreachable(&endpoint.name).await;
                Err(e)
            }
        }
    }

    /// Files a response into an inbox. Deposit failure never fails the
    /// send that produced the response.
    async fn deposit(&self, from: &CiName, deposit: &Deposit, response: &str) {
        let entry = InboxEntry::new(from.clone(), deposit.endpoint.clone(), response);
        if let Err(e) = self
            .inner
            .inbox
            .push(&deposit.endpoint, deposit.category, entry)
            .await
        {
            warn!(
                endpoint = %deposit.endpoint,
                category = %deposit.category,
                error = %e,
                "Failed to deposit response"
            );
        }
    }
}
