//! Keyed in-memory session state.
//!
//! `DashMap` gives each session its own exclusive entry reference, so
//! operations on different session ids never contend with each other.
//! Ordering of mutations *within* one session is supplied by the caller
//! (the per-session ingest worker); the store guarantees each applied vote
//! is atomic and never observable half-done.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::errors::PollError;
use crate::ids::SessionId;
use crate::poll::{PollSession, SessionSnapshot, TallySnapshot};

/// All live poll sessions, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, PollSession>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Create a session with the given option set, all counts at zero.
    pub fn create(&self, id: SessionId, options: Vec<String>) -> Result<(), PollError> {
        // Validate before touching the map so a failed create never races
        // a concurrent create for the same id into a half-made entry.
        let session = PollSession::new(id.clone(), options)?;
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => Err(PollError::AlreadyExists {
                id: entry.key().to_string(),
            }),
            Entry::Vacant(entry) => {
                debug!(session_id = %entry.key(), "session created");
                let _ = entry.insert(session);
                Ok(())
            }
        }
    }

    /// Apply one vote to a session under its exclusive entry reference.
    pub fn apply_vote(
        &self,
        id: &SessionId,
        voter: &str,
        option: &str,
    ) -> Result<TallySnapshot, PollError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| PollError::SessionNotFound { id: id.to_string() })?;
        session.apply_vote(voter, option)
    }

    /// Point-in-time copy of a session.
    pub fn snapshot(&self, id: &SessionId) -> Result<SessionSnapshot, PollError> {
        self.sessions
            .get(id)
            .map(|session| session.snapshot())
            .ok_or_else(|| PollError::SessionNotFound { id: id.to_string() })
    }

    /// Whether a session exists.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Tear a session down. Returns `false` when it was already gone.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session removed");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store has no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all live sessions (unordered).
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}
