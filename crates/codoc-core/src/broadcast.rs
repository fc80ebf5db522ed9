//! Room broadcaster - fan-out to every member of a document room

use crate::connection::{ConnectionId, ConnectionRegistry, Payload};
use crate::document::DocumentId;
use std::sync::Arc;
use tracing::{trace, warn};

/// Pure fan-out primitive over the connection registry's send
/// capabilities. Performs no parsing: callers hand it an
/// already-serialized payload, cloned cheaply per recipient.
#[derive(Clone)]
pub struct Broadcaster {
    connections: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Send a payload to every member of a room except `exclude`.
    ///
    /// A send failure on one connection never aborts delivery to the
    /// others; failing connections are pruned from the registry so they
    /// stop receiving traffic they cannot accept. Returns the number of
    /// successful deliveries.
    pub fn broadcast(
        &self,
        doc: &DocumentId,
        payload: Payload,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for member in self.connections.members(doc) {
            if Some(&member) == exclude {
                continue;
            }
            if self.connections.send(&member, payload.clone()) {
                delivered += 1;
            } else {
                dead.push(member);
            }
        }

        for conn in dead {
            warn!(client = %conn, doc = %doc, "Pruning dead connection during broadcast");
            self.connections.unregister(&conn);
        }

        if delivered > 0 {
            trace!(doc = %doc, count = delivered, "Broadcast delivered");
        }
        delivered
    }
}
