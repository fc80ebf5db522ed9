//! Liveness sweeper - periodic eviction of stale participants

use codoc_core::{Hub, Payload};
use codoc_protocol::{DepartureReason, PresenceChange, ServerEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::info;

/// How often the sweep runs.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);
/// How long a participant may go without a heartbeat.
pub const DEFAULT_PRESENCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Single background task that scans the presence registry and evicts
/// participants past their heartbeat deadline, announcing each
/// departure to its room. One sweep costs O(active participants); no
/// per-participant timers exist.
pub struct LivenessSweeper {
    hub: Arc<Hub>,
    interval: Duration,
    timeout: Duration,
}

impl LivenessSweeper {
    pub fn new(hub: Arc<Hub>, interval: Duration, timeout: Duration) -> Self {
        Self {
            hub,
            interval,
            timeout,
        }
    }

    pub fn with_defaults(hub: Arc<Hub>) -> Self {
        Self::new(hub, DEFAULT_SWEEP_INTERVAL, DEFAULT_PRESENCE_TIMEOUT)
    }

    /// Run one sweep pass. Returns the number of evicted participants.
    pub fn sweep_once(&self) -> usize {
        let evicted = self.hub.presence.sweep_expired(Instant::now(), self.timeout);

        for (doc, key, participant) in &evicted {
            // The evicted participant's connections no longer claim
            // membership; they must re-join to come back
            for conn in self.hub.connections.members_for_participant(doc, key) {
                self.hub.connections.leave_room(&conn, doc);
            }

            let event = ServerEvent::PresenceUpdate {
                document_id: doc.to_string(),
                kind: PresenceChange::Left,
                participant: key.to_string(),
                info: None,
                is_guest: participant.is_guest,
                reason: Some(DepartureReason::Timeout),
            };
            self.hub.broadcast(doc, Payload::text(event.to_json()), None);
            self.hub.evict_if_empty(doc);
        }

        evicted.len()
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                let evicted = self.sweep_once();
                if evicted > 0 {
                    info!(evicted, "Evicted stale participants");
                }
            }
        })
    }
}
