//! Auth error types.

/// Why a presented token was rejected.
///
/// Both variants cause the carrying event to be dropped without mutating
/// poll state; the distinction only matters for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Signature verified but the token is past its expiry instant.
    #[error("token expired")]
    Expired,

    /// Bad signature, malformed token, or any other verification failure.
    #[error("invalid token")]
    Invalid,

    /// Issuance-side failure while signing a new token.
    #[error("token signing failed: {0}")]
    Signing(String),
}

impl AuthError {
    /// Stable label used for the `votes_rejected_total{reason=...}` counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Expired => "auth_expired",
            Self::Invalid | Self::Signing(_) => "auth_invalid",
        }
    }
}
