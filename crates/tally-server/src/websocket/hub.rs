//! Tally fan-out to connected listeners.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tally_core::{ConnectionId, SessionId, TallySnapshot};

use crate::wire::ServerMessage;

use super::connection::Listener;

/// Registers listener handles and fans tally snapshots out to every
/// listener joined to the updated session.
///
/// A broadcast serializes the snapshot once and delivers the shared frame
/// with non-blocking sends. A failed delivery (closed connection or full
/// queue) unregisters that handle and never blocks or fails the rest of
/// the fan-out: a handle that stays registered has seen every update for
/// its session.
pub struct BroadcastHub {
    listeners: RwLock<HashMap<ConnectionId, Arc<Listener>>>,
    /// Atomic mirror of the map size, readable without the lock.
    active: AtomicUsize,
}

impl BroadcastHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            active: AtomicUsize::new(0),
        }
    }

    /// Register a listener handle.
    pub async fn register(&self, listener: Arc<Listener>) {
        let mut listeners = self.listeners.write().await;
        if listeners.insert(listener.id.clone(), listener).is_none() {
            let _ = self.active.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Unregister a listener. Unregistering an unknown id is a no-op;
    /// disconnect races are expected, not errors.
    pub async fn unregister(&self, id: &ConnectionId) {
        let mut listeners = self.listeners.write().await;
        if listeners.remove(id).is_some() {
            let _ = self.active.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Deliver a snapshot to every listener joined to its session.
    ///
    /// Best-effort per listener. Removals happen after the read-locked
    /// fan-out pass, so they are safe to race with registration and with
    /// the listeners' own disconnects. Returns the number of successful
    /// deliveries.
    pub async fn broadcast(&self, snapshot: TallySnapshot) -> usize {
        let session = snapshot.session.clone();
        let seq = snapshot.seq;
        let frame = match serde_json::to_string(&ServerMessage::tally(snapshot)) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(session_id = %session, error = %e, "failed to serialize tally snapshot");
                return 0;
            }
        };

        let mut delivered = 0usize;
        let mut evict = Vec::new();
        {
            let listeners = self.listeners.read().await;
            for listener in listeners.values() {
                if !listener.is_joined_to(&session) {
                    continue;
                }
                if listener.send(Arc::clone(&frame)) {
                    delivered += 1;
                    continue;
                }
                counter!(crate::metrics::WS_BROADCAST_DROPS_TOTAL).increment(1);
                if listener.is_closed() {
                    debug!(conn_id = %listener.id, session_id = %session, "listener gone, unregistering");
                } else {
                    warn!(
                        conn_id = %listener.id,
                        session_id = %session,
                        drops = listener.drop_count(),
                        "listener not keeping up, unregistering"
                    );
                }
                evict.push(listener.id.clone());
            }
            debug!(session_id = %session, seq, delivered, "broadcast tally");
        }

        if !evict.is_empty() {
            let mut listeners = self.listeners.write().await;
            for id in &evict {
                if listeners.remove(id).is_some() {
                    let _ = self.active.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
        counter!(crate::metrics::TALLY_BROADCASTS_TOTAL).increment(1);
        delivered
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Listeners currently joined to a session.
    pub async fn session_listeners(&self, session: &SessionId) -> Vec<Arc<Listener>> {
        let listeners = self.listeners.read().await;
        listeners
            .values()
            .filter(|l| l.is_joined_to(session))
            .cloned()
            .collect()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}
