//! # Connection Registry
//!
//! Pure bookkeeping for every live WebSocket connection, grouped into four
//! disjoint pools:
//! - **primaries**: one per session, receives dispatcher output
//! - **observers**: passive mirrors of primary output (the ObserverSet)
//! - **bridge frontends / backends**: the two pools of the server bridge
//!
//! ## Concurrency Discipline:
//! Pools are `RwLock<HashMap<ConnectionId, Recipient<Outbound>>>`. All
//! iteration happens over a cloned snapshot taken under the read lock, so
//! delivery passes never observe a torn set while connect/disconnect events
//! mutate membership. Removals discovered during a delivery pass are applied
//! afterwards in one write-locked batch.

use crate::broadcast::Outbound;
use actix::Recipient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

/// Stable handle for one live connection. Never reused.
pub type ConnectionId = u64;

/// One pool of connections.
#[derive(Default)]
struct Pool {
    connections: RwLock<HashMap<ConnectionId, Recipient<Outbound>>>,
}

impl Pool {
    fn insert(&self, id: ConnectionId, recipient: Recipient<Outbound>) {
        self.connections.write().unwrap().insert(id, recipient);
    }

    fn remove(&self, id: ConnectionId) -> bool {
        self.connections.write().unwrap().remove(&id).is_some()
    }

    fn remove_all(&self, ids: &[ConnectionId]) {
        if ids.is_empty() {
            return;
        }
        let mut connections = self.connections.write().unwrap();
        for id in ids {
            connections.remove(id);
        }
    }

    fn snapshot(&self) -> Vec<(ConnectionId, Recipient<Outbound>)> {
        self.connections
            .read()
            .unwrap()
            .iter()
            .map(|(id, recipient)| (*id, recipient.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.connections.read().unwrap().len()
    }
}

/// Registry of all live connections, shared process-wide through
/// [`crate::state::AppState`].
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    primaries: Pool,
    observers: Pool,
    bridge_frontends: Pool,
    bridge_backends: Pool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh connection handle.
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_primary(&self, id: ConnectionId, recipient: Recipient<Outbound>) {
        self.primaries.insert(id, recipient);
        debug!(connection_id = id, "Registered primary connection");
    }

    pub fn unregister_primary(&self, id: ConnectionId) {
        if self.primaries.remove(id) {
            debug!(connection_id = id, "Unregistered primary connection");
        }
    }

    pub fn register_observer(&self, id: ConnectionId, recipient: Recipient<Outbound>) {
        self.observers.insert(id, recipient);
        debug!(connection_id = id, "Registered observer connection");
    }

    pub fn unregister_observer(&self, id: ConnectionId) {
        if self.observers.remove(id) {
            debug!(connection_id = id, "Unregistered observer connection");
        }
    }

    /// Remove every observer that failed a delivery pass, in one batch.
    pub fn prune_observers(&self, ids: &[ConnectionId]) {
        self.observers.remove_all(ids);
        if !ids.is_empty() {
            debug!(pruned = ids.len(), "Pruned dead observer connections");
        }
    }

    pub fn register_bridge_frontend(&self, id: ConnectionId, recipient: Recipient<Outbound>) {
        self.bridge_frontends.insert(id, recipient);
    }

    pub fn unregister_bridge_frontend(&self, id: ConnectionId) {
        self.bridge_frontends.remove(id);
    }

    pub fn register_bridge_backend(&self, id: ConnectionId, recipient: Recipient<Outbound>) {
        self.bridge_backends.insert(id, recipient);
    }

    pub fn unregister_bridge_backend(&self, id: ConnectionId) {
        self.bridge_backends.remove(id);
    }

    pub fn snapshot_primaries(&self) -> Vec<(ConnectionId, Recipient<Outbound>)> {
        self.primaries.snapshot()
    }

    pub fn snapshot_observers(&self) -> Vec<(ConnectionId, Recipient<Outbound>)> {
        self.observers.snapshot()
    }

    pub fn snapshot_bridge_frontends(&self) -> Vec<(ConnectionId, Recipient<Outbound>)> {
        self.bridge_frontends.snapshot()
    }

    pub fn snapshot_bridge_backends(&self) -> Vec<(ConnectionId, Recipient<Outbound>)> {
        self.bridge_backends.snapshot()
    }

    /// Remove primaries that failed an administrative broadcast.
    pub fn prune_primaries(&self, ids: &[ConnectionId]) {
        self.primaries.remove_all(ids);
    }

    pub fn primary_count(&self) -> usize {
        self.primaries.len()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn bridge_counts(&self) -> (usize, usize) {
        (self.bridge_frontends.len(), self.bridge_backends.len())
    }
}
