//! HS256 signed vote tokens.
//!
//! A token carries the voter's display name (`sub`) and an expiry instant
//! (`exp`), signed with a shared secret. Issuance happens once at login;
//! verification runs on every vote event.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AuthError;

/// Default token lifetime (matches the 5-minute login tokens of the
/// original service).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// The voter resolved from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Display name the token was issued to.
    pub name: String,
    /// Instant after which the token stops verifying.
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// Issues and verifies vote tokens with a shared HS256 secret.
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenAuthority {
    /// Build an authority around a shared secret.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `now < expiry` exactly, with no clock-skew grace window.
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Issue a signed token for a display name, expiring `ttl` from now.
    pub fn issue(&self, name: &str) -> Result<String, AuthError> {
        let expires_at = Utc::now() + self.ttl;
        let claims = Claims {
            sub: name.to_owned(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Token lifetime used by [`Self::issue`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl crate::Authenticator for TokenAuthority {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    debug!(error = %e, "token rejected");
                    AuthError::Invalid
                }
            }
        })?;
        let expires_at = Utc
            .timestamp_opt(data.claims.exp, 0)
            .single()
            .ok_or(AuthError::Invalid)?;
        Ok(Identity {
            name: data.claims.sub,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Authenticator;
    use assert_matches::assert_matches;

    fn authority() -> TokenAuthority {
        TokenAuthority::new(b"test-secret", DEFAULT_TOKEN_TTL)
    }

    #[test]
    fn issue_then_authenticate_roundtrip() {
        let auth = authority();
        let token = auth.issue("alice").unwrap();
        let identity = auth.authenticate(&token).unwrap();
        assert_eq!(identity.name, "alice");
        assert!(identity.expires_at > Utc::now());
    }

    #[test]
    fn expired_token_is_expired_not_invalid() {
        let auth = authority();
        // Hand-craft a token whose exp is an hour in the past.
        let claims = Claims {
            sub: "alice".into(),
            exp: (Utc::now() - Duration::from_secs(3600)).timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();

        assert_matches!(auth.authenticate(&token), Err(AuthError::Expired));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let issuer = TokenAuthority::new(b"secret-a", DEFAULT_TOKEN_TTL);
        let verifier = TokenAuthority::new(b"secret-b", DEFAULT_TOKEN_TTL);
        let token = issuer.issue("alice").unwrap();
        assert_matches!(verifier.authenticate(&token), Err(AuthError::Invalid));
    }

    #[test]
    fn tampered_token_is_invalid() {
        let auth = authority();
        let mut token = auth.issue("alice").unwrap();
        // Flip a character in the payload segment.
        let flipped = if token.ends_with('a') { 'b' } else { 'a' };
        token.pop();
        token.push(flipped);
        assert_matches!(auth.authenticate(&token), Err(AuthError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        let auth = authority();
        assert_matches!(auth.authenticate("not a jwt"), Err(AuthError::Invalid));
        assert_matches!(auth.authenticate(""), Err(AuthError::Invalid));
    }

    #[test]
    fn ttl_round_trips_into_expiry() {
        let auth = TokenAuthority::new(b"s", Duration::from_secs(60));
        let token = auth.issue("bob").unwrap();
        let identity = auth.authenticate(&token).unwrap();
        let remaining = identity.expires_at - Utc::now();
        assert!(remaining.num_seconds() <= 60);
        assert!(remaining.num_seconds() >= 55);
    }

    #[test]
    fn identities_are_per_subject() {
        let auth = authority();
        let a = auth.authenticate(&auth.issue("alice").unwrap()).unwrap();
        let b = auth.authenticate(&auth.issue("bob").unwrap()).unwrap();
        assert_ne!(a.name, b.name);
    }
}
