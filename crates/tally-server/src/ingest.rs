//! Single-writer vote ingestion.
//!
//! Concurrent connections submit [`VoteEvent`]s; each live session gets
//! exactly one worker task that drains its queue and, per event, runs
//! authenticate → apply → broadcast strictly in order. The next event is
//! not taken until the previous snapshot has been handed to the hub, which
//! is what makes the per-session broadcast order equal the applied order.
//!
//! Queues are per session, so traffic for one poll never contends with
//! another. Submission is non-blocking: a full queue surfaces as
//! [`IngestError::Backpressure`] to the submitting connection only.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tally_auth::Authenticator;
use tally_core::{PollError, SessionId, SessionStore};

use crate::websocket::hub::BroadcastHub;

/// One vote submission. Transient: consumed exactly once by the worker.
#[derive(Debug, Clone)]
pub struct VoteEvent {
    /// The session voted in.
    pub session: SessionId,
    /// The chosen option.
    pub option: String,
    /// Signed voter token, verified by the worker before any mutation.
    pub token: String,
}

/// Why a submission was not enqueued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The named session does not exist. Reported synchronously to the
    /// submitting connection.
    #[error("session '{id}' not found")]
    SessionNotFound {
        /// The unknown session identifier.
        id: String,
    },

    /// The session's queue is full; the vote was not accepted.
    #[error("session '{id}' is not keeping up, vote dropped")]
    Backpressure {
        /// The congested session identifier.
        id: String,
    },

    /// The server is draining and no longer accepts votes.
    #[error("server is shutting down")]
    ShuttingDown,
}

/// Routes vote events to per-session single-writer workers.
pub struct IngestRouter {
    store: Arc<SessionStore>,
    hub: Arc<BroadcastHub>,
    auth: Arc<dyn Authenticator>,
    workers: DashMap<SessionId, mpsc::Sender<VoteEvent>>,
    queue_depth: usize,
    cancel: CancellationToken,
}

impl IngestRouter {
    /// Create a router. `cancel` stops every worker when triggered.
    pub fn new(
        store: Arc<SessionStore>,
        hub: Arc<BroadcastHub>,
        auth: Arc<dyn Authenticator>,
        queue_depth: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            auth,
            workers: DashMap::new(),
            queue_depth,
            cancel,
        }
    }

    /// Submit one vote event.
    ///
    /// Never blocks. `SessionNotFound` and `Backpressure` are the only
    /// outcomes the submitter learns about; auth and option rejections
    /// happen later in the worker and are silent to every client.
    pub fn submit(&self, event: VoteEvent) -> Result<(), IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::ShuttingDown);
        }
        if !self.store.contains(&event.session) {
            return Err(IngestError::SessionNotFound {
                id: event.session.to_string(),
            });
        }

        let session = event.session.clone();
        let tx = self.worker_sender(&session);
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %session, "ingest queue full, vote rejected");
                counter!(crate::metrics::VOTES_REJECTED_TOTAL, "reason" => "backpressure")
                    .increment(1);
                Err(IngestError::Backpressure {
                    id: session.to_string(),
                })
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                // The worker exited (shutdown race or teardown). Drop the
                // stale sender and retry once against a fresh worker.
                let _ = self.workers.remove(&session);
                if self.cancel.is_cancelled() {
                    return Err(IngestError::ShuttingDown);
                }
                self.worker_sender(&session)
                    .try_send(event)
                    .map_err(|_| IngestError::Backpressure {
                        id: session.to_string(),
                    })
            }
        }
    }

    /// Stop the worker of a torn-down session. Queued events for it are
    /// still drained (and will reject with `SessionNotFound` once the
    /// store entry is gone).
    pub fn close_session(&self, session: &SessionId) {
        if self.workers.remove(session).is_some() {
            debug!(session_id = %session, "ingest worker closed");
        }
    }

    /// Number of live per-session workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Get the session's worker sender, spawning the worker on first use.
    fn worker_sender(&self, session: &SessionId) -> mpsc::Sender<VoteEvent> {
        match self.workers.entry(session.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(self.queue_depth);
                let worker = SessionWorker {
                    session: session.clone(),
                    store: self.store.clone(),
                    hub: self.hub.clone(),
                    auth: self.auth.clone(),
                    cancel: self.cancel.clone(),
                };
                drop(tokio::spawn(worker.run(rx)));
                let _ = entry.insert(tx.clone());
                tx
            }
        }
    }
}

/// The single writer for one session.
struct SessionWorker {
    session: SessionId,
    store: Arc<SessionStore>,
    hub: Arc<BroadcastHub>,
    auth: Arc<dyn Authenticator>,
    cancel: CancellationToken,
}

impl SessionWorker {
    async fn run(self, mut rx: mpsc::Receiver<VoteEvent>) {
        info!(session_id = %self.session, "ingest worker started");
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => break,
                },
                () = self.cancel.cancelled() => break,
            }
        }
        info!(session_id = %self.session, "ingest worker stopped");
    }

    /// authenticate → apply → broadcast, as one ordered step.
    async fn process(&self, event: VoteEvent) {
        let started = Instant::now();

        let identity = match self.auth.authenticate(&event.token) {
            Ok(identity) => identity,
            Err(e) => {
                debug!(session_id = %event.session, reason = e.reason(), "vote rejected");
                counter!(crate::metrics::VOTES_REJECTED_TOTAL, "reason" => e.reason())
                    .increment(1);
                return;
            }
        };

        let snapshot = match self
            .store
            .apply_vote(&event.session, &identity.name, &event.option)
        {
            Ok(snapshot) => snapshot,
            Err(e @ PollError::InvalidOption { .. }) => {
                debug!(session_id = %event.session, voter = %identity.name, error = %e, "vote rejected");
                counter!(crate::metrics::VOTES_REJECTED_TOTAL, "reason" => "invalid_option")
                    .increment(1);
                return;
            }
            Err(e) => {
                // Session torn down between submit and processing.
                debug!(session_id = %event.session, error = %e, "vote dropped");
                counter!(crate::metrics::VOTES_REJECTED_TOTAL, "reason" => "session_gone")
                    .increment(1);
                return;
            }
        };

        counter!(crate::metrics::VOTES_APPLIED_TOTAL).increment(1);
        let _ = self.hub.broadcast(snapshot).await;
        histogram!(crate::metrics::VOTE_APPLY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
    }
}
