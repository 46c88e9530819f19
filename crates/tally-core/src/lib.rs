//! # tally-core
//!
//! Foundation types for the tally live-polling service.
//!
//! - Branded ID newtypes (`SessionId`, `ConnectionId`)
//! - `PollSession` and the tally engine (`apply_vote`)
//! - `SessionStore`: keyed in-memory session state, one exclusive entry per
//!   session so different sessions never contend
//! - The `PollError` taxonomy shared across the workspace
//!
//! This crate has no network or crypto dependencies and is fully testable
//! in isolation.

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod poll;
pub mod store;

pub use errors::PollError;
pub use ids::{ConnectionId, SessionId};
pub use poll::{PollSession, SessionSnapshot, TallySnapshot};
pub use store::SessionStore;
