//! Error taxonomy and wire-format error codes.

// ── Error code constants ────────────────────────────────────────────

/// Invalid or missing parameters (malformed message, empty option list).
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Session does not exist.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Session already exists under this identifier.
pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
/// Vote names an option outside the session's established set.
pub const INVALID_OPTION: &str = "INVALID_OPTION";
/// Operation requires the connection to have joined a session first.
pub const NOT_JOINED: &str = "NOT_JOINED";
/// Vote dropped because the session's ingest queue is full.
pub const BACKPRESSURE: &str = "BACKPRESSURE";
/// Server is shutting down and no longer accepts the operation.
pub const UNAVAILABLE: &str = "UNAVAILABLE";

/// Errors from session creation and vote application.
///
/// `AuthExpired`/`AuthInvalid` deliberately do not appear here: the auth
/// gate has its own taxonomy in `tally-auth`, and rejected events never
/// reach the tally engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// A session cannot be created without at least one option.
    #[error("a poll needs at least one option")]
    EmptyOptions,

    /// The option set contains the same name twice.
    #[error("duplicate option '{option}'")]
    DuplicateOption {
        /// The repeated option name.
        option: String,
    },

    /// A session with this identifier already exists.
    #[error("session '{id}' already exists")]
    AlreadyExists {
        /// The conflicting session identifier.
        id: String,
    },

    /// No session registered under this identifier.
    #[error("session '{id}' not found")]
    SessionNotFound {
        /// The unknown session identifier.
        id: String,
    },

    /// The vote names an option the session was not created with.
    #[error("'{option}' is not an option of this poll")]
    InvalidOption {
        /// The rejected option name.
        option: String,
    },
}

impl PollError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyOptions | Self::DuplicateOption { .. } => INVALID_PARAMS,
            Self::AlreadyExists { .. } => ALREADY_EXISTS,
            Self::SessionNotFound { .. } => SESSION_NOT_FOUND,
            Self::InvalidOption { .. } => INVALID_OPTION,
        }
    }
}
