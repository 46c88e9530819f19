//! Poll session state and the tally engine.
//!
//! A [`PollSession`] owns the option set fixed at creation, the per-option
//! counts, and the per-voter choice map. [`PollSession::apply_vote`] is the
//! single mutation path: it updates counts and choice together under
//! `&mut self`, so a reader can never observe a half-applied vote.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::errors::PollError;
use crate::ids::SessionId;

/// One poll instance: fixed option set, live tally, per-voter choices.
#[derive(Debug, Clone)]
pub struct PollSession {
    id: SessionId,
    /// Options in creation order.
    options: Vec<String>,
    /// Current count per option. Every key is in `options`.
    counts: HashMap<String, u64>,
    /// Voter display name → the option they last chose. At most one active
    /// choice per voter; recasting overwrites, never double-counts.
    choices: HashMap<String, String>,
    /// Monotonic per-session sequence, bumped once per accepted vote.
    seq: u64,
}

/// The full tally published to listeners after one accepted vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallySnapshot {
    /// The session this snapshot belongs to.
    pub session: SessionId,
    /// Position of the triggering vote in the session's applied order.
    pub seq: u64,
    /// Option → current count, for every option of the poll.
    pub tally: BTreeMap<String, u64>,
    /// Display name of the voter whose vote produced this snapshot.
    pub voter: String,
}

/// Point-in-time read of a whole session (admin/read surface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// The session identifier.
    pub session_id: SessionId,
    /// Options in creation order.
    pub options: Vec<String>,
    /// Option → current count.
    pub tally: BTreeMap<String, u64>,
    /// Number of distinct voters with a recorded choice.
    pub voters: u64,
    /// Number of votes applied so far.
    pub seq: u64,
}

impl PollSession {
    /// Create a session with all counts at zero.
    ///
    /// Rejects an empty option set and duplicate option names; both would
    /// make later votes ambiguous.
    pub fn new(id: SessionId, options: Vec<String>) -> Result<Self, PollError> {
        if options.is_empty() {
            return Err(PollError::EmptyOptions);
        }
        let mut counts = HashMap::with_capacity(options.len());
        for option in &options {
            if counts.insert(option.clone(), 0).is_some() {
                return Err(PollError::DuplicateOption {
                    option: option.clone(),
                });
            }
        }
        Ok(Self {
            id,
            options,
            counts,
            choices: HashMap::new(),
            seq: 0,
        })
    }

    /// The session identifier.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Options in creation order.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Apply one vote as an indivisible step.
    ///
    /// The voter's recorded choice is replaced, the prior option (if any)
    /// decremented, and the new option incremented: a re-vote moves the
    /// vote instead of adding a second one. The returned snapshot reflects
    /// the session immediately after this vote.
    pub fn apply_vote(&mut self, voter: &str, option: &str) -> Result<TallySnapshot, PollError> {
        if !self.counts.contains_key(option) {
            return Err(PollError::InvalidOption {
                option: option.to_owned(),
            });
        }

        if let Some(previous) = self.choices.insert(voter.to_owned(), option.to_owned()) {
            if let Some(count) = self.counts.get_mut(&previous) {
                *count = count.saturating_sub(1);
            }
        }
        if let Some(count) = self.counts.get_mut(option) {
            *count += 1;
        }
        self.seq += 1;

        Ok(TallySnapshot {
            session: self.id.clone(),
            seq: self.seq,
            tally: self.tally(),
            voter: voter.to_owned(),
        })
    }

    /// Current option → count mapping.
    pub fn tally(&self) -> BTreeMap<String, u64> {
        self.counts
            .iter()
            .map(|(option, count)| (option.clone(), *count))
            .collect()
    }

    /// Point-in-time copy of the whole session.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            options: self.options.clone(),
            tally: self.tally(),
            voters: self.choices.len() as u64,
            seq: self.seq,
        }
    }

    /// Number of distinct voters with a recorded choice.
    pub fn voter_count(&self) -> usize {
        self.choices.len()
    }

    /// Sum of all option counts. Always equals [`Self::voter_count`].
    pub fn total_votes(&self) -> u64 {
        self.counts.values().sum()
    }
}
