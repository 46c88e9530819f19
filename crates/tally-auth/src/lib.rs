//! # tally-auth
//!
//! The auth gate for the voting core: issue and verify the signed tokens
//! clients attach to vote events.
//!
//! The voting core only depends on the [`Authenticator`] trait, so tests
//! run with an in-process fake and the real [`TokenAuthority`] (HS256 via
//! `jsonwebtoken`) is injected at the edge. Verification is a pure function
//! of the token and the clock; nothing here mutates poll state.

#![deny(unsafe_code)]

pub mod errors;
pub mod token;

pub use errors::AuthError;
pub use token::{Identity, TokenAuthority, DEFAULT_TOKEN_TTL};

/// Verifies a presented token and resolves the voter behind it.
///
/// Implemented by [`TokenAuthority`] for production and by hand-rolled
/// fakes in tests. Must be cheap: it runs inline in the ingest loop for
/// every vote event.
pub trait Authenticator: Send + Sync {
    /// Verify `token` and return the identity it was issued to.
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}
