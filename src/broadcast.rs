//! # Broadcast Fan-out
//!
//! Delivery of one outbound event to a session's primary connection plus
//! every current observer connection. Every dispatcher emission and every
//! pipeline emission goes through here, never a direct socket write, so
//! observers always see exactly what the primary sees.
//!
//! ## Delivery Guarantees:
//! - The primary is sent to first, best-effort: a failed primary send is
//!   logged but never raised into the dispatcher loop (the connection's
//!   read loop is what ultimately notices the disconnect and tears the
//!   session down).
//! - Observers are delivered from a snapshot; a failing observer is marked
//!   and skipped, never allowed to block or fail its siblings, and the
//!   marked set is pruned from the registry after the pass.

use crate::events::ServerEvent;
use crate::registry::{ConnectionId, ConnectionRegistry};
use actix::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};

/// One serialized frame on its way to a WebSocket connection.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct Outbound(pub String);

/// Fan-out handle bound to one session's primary connection.
///
/// Cheap to clone; clones are handed to spawned pipeline tasks as their
/// send-callback. A clone held by a superseded pipeline task stays valid:
/// its sends either land in live mailboxes or fail quietly, they can never
/// panic the sender.
#[derive(Clone)]
pub struct Broadcaster {
    primary_id: ConnectionId,
    primary: Recipient<Outbound>,
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(
        primary_id: ConnectionId,
        primary: Recipient<Outbound>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            primary_id,
            primary,
            registry,
        }
    }

    /// Deliver a typed event to the primary and all observers.
    pub fn deliver(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(json) => self.deliver_raw(json),
            Err(err) => {
                // Serialization of our own enum failing is a bug, but it
                // must stay local to this one emission.
                warn!(error = %err, "Failed to serialize outbound event");
            }
        }
    }

    /// Deliver an already-serialized frame (pipeline-originated events are
    /// opaque to the core and arrive here pre-encoded).
    pub fn deliver_raw(&self, json: String) {
        // Primary first. do_send queues into an unbounded mailbox; if the
        // actor is gone the frame is silently dropped, which is exactly the
        // best-effort contract for the primary path.
        self.primary.do_send(Outbound(json.clone()));

        // Observer pass over a snapshot; membership can change concurrently
        // without tearing this iteration.
        let observers = self.registry.snapshot_observers();
        let mut failed: Vec<ConnectionId> = Vec::new();

        for (id, recipient) in observers {
            if id == self.primary_id {
                continue;
            }
            if let Err(err) = recipient.try_send(Outbound(json.clone())) {
                debug!(connection_id = id, error = %err, "Observer send failed, marking for removal");
                failed.push(id);
            }
        }

        self.registry.prune_observers(&failed);
    }
}
