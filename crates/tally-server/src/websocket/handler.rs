//! Inbound message dispatch.
//!
//! Parses one text frame as a [`ClientMessage`] and routes it. The return
//! value is the direct reply to the sender, if any. Accepted votes reply
//! with nothing here, because their outcome reaches the client through the
//! broadcast path like everyone else.

use tracing::{debug, instrument, warn};

use tally_core::errors;
use tally_core::SessionStore;

use crate::ingest::{IngestError, IngestRouter, VoteEvent};
use crate::wire::{ClientMessage, ServerMessage};

use super::connection::Listener;

/// Handle one inbound text frame from `listener`.
#[instrument(skip_all, fields(conn_id = %listener.id))]
pub fn handle_message(
    text: &str,
    listener: &Listener,
    store: &SessionStore,
    ingest: &IngestRouter,
) -> Option<ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("malformed client message");
            return Some(ServerMessage::error(
                errors::INVALID_PARAMS,
                format!("invalid message: {e}"),
            ));
        }
    };

    match message {
        ClientMessage::Join { session } => match store.snapshot(&session) {
            Ok(snapshot) => {
                listener.join(session.clone());
                debug!(session_id = %session, "listener joined session");
                Some(ServerMessage::Joined { session, snapshot })
            }
            Err(e) => Some(ServerMessage::error(e.code(), e.to_string())),
        },
        ClientMessage::Vote {
            session,
            vote,
            token,
        } => {
            let result = ingest.submit(VoteEvent {
                session,
                option: vote,
                token,
            });
            match result {
                // Accepted: the tally broadcast is the reply.
                Ok(()) => None,
                Err(e @ IngestError::SessionNotFound { .. }) => {
                    Some(ServerMessage::error(errors::SESSION_NOT_FOUND, e.to_string()))
                }
                Err(e @ IngestError::Backpressure { .. }) => {
                    Some(ServerMessage::error(errors::BACKPRESSURE, e.to_string()))
                }
                Err(e @ IngestError::ShuttingDown) => {
                    Some(ServerMessage::error(errors::UNAVAILABLE, e.to_string()))
                }
            }
        }
        ClientMessage::Leave => match listener.leave() {
            Some(session) => {
                debug!(session_id = %session, "listener left session");
                None
            }
            None => Some(ServerMessage::error(
                errors::NOT_JOINED,
                "no session joined",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::BroadcastHub;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::time::Duration;
    use tally_auth::{AuthError, Authenticator, Identity};
    use tally_core::{ConnectionId, SessionId};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct FakeAuth;

    impl Authenticator for FakeAuth {
        fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
            token
                .strip_prefix("ok:")
                .map(|name| Identity {
                    name: name.to_owned(),
                    expires_at: chrono::Utc::now() + Duration::from_secs(60),
                })
                .ok_or(AuthError::Invalid)
        }
    }

    struct Fixture {
        store: Arc<SessionStore>,
        ingest: IngestRouter,
        listener: Listener,
        _rx: mpsc::Receiver<Arc<String>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SessionStore::new());
        store
            .create(SessionId::from("s1"), vec!["red".into(), "blue".into()])
            .unwrap();
        let hub = Arc::new(BroadcastHub::new());
        let ingest = IngestRouter::new(
            store.clone(),
            hub,
            Arc::new(FakeAuth),
            64,
            CancellationToken::new(),
        );
        let (tx, rx) = mpsc::channel(64);
        let listener = Listener::new(ConnectionId::from("c1"), tx);
        Fixture {
            store,
            ingest,
            listener,
            _rx: rx,
        }
    }

    #[tokio::test]
    async fn malformed_json_replies_invalid_params() {
        let f = fixture();
        let reply = handle_message("not json", &f.listener, &f.store, &f.ingest);
        assert_matches!(
            reply,
            Some(ServerMessage::Error { code, .. }) if code == errors::INVALID_PARAMS
        );
    }

    #[tokio::test]
    async fn join_known_session_attaches_and_returns_snapshot() {
        let f = fixture();
        let reply = handle_message(
            r#"{"type":"join","session":"s1"}"#,
            &f.listener,
            &f.store,
            &f.ingest,
        );
        assert_matches!(
            reply,
            Some(ServerMessage::Joined { session, snapshot })
                if session.as_str() == "s1" && snapshot.options == vec!["red", "blue"]
        );
        assert!(f.listener.is_joined_to(&SessionId::from("s1")));
    }

    #[tokio::test]
    async fn join_unknown_session_is_not_found() {
        let f = fixture();
        let reply = handle_message(
            r#"{"type":"join","session":"ghost"}"#,
            &f.listener,
            &f.store,
            &f.ingest,
        );
        assert_matches!(
            reply,
            Some(ServerMessage::Error { code, .. }) if code == errors::SESSION_NOT_FOUND
        );
        assert!(f.listener.session().is_none());
    }

    #[tokio::test]
    async fn accepted_vote_has_no_direct_reply() {
        let f = fixture();
        let reply = handle_message(
            r#"{"type":"vote","session":"s1","vote":"red","token":"ok:alice"}"#,
            &f.listener,
            &f.store,
            &f.ingest,
        );
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn vote_against_unknown_session_replies_not_found() {
        let f = fixture();
        let reply = handle_message(
            r#"{"type":"vote","session":"ghost","vote":"red","token":"ok:alice"}"#,
            &f.listener,
            &f.store,
            &f.ingest,
        );
        assert_matches!(
            reply,
            Some(ServerMessage::Error { code, .. }) if code == errors::SESSION_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn vote_with_bad_token_is_silent_to_sender() {
        // The submission is accepted; the rejection happens in the worker
        // and is deliberately not surfaced.
        let f = fixture();
        let reply = handle_message(
            r#"{"type":"vote","session":"s1","vote":"red","token":"bogus"}"#,
            &f.listener,
            &f.store,
            &f.ingest,
        );
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn leave_when_joined_is_silent() {
        let f = fixture();
        f.listener.join(SessionId::from("s1"));
        let reply = handle_message(r#"{"type":"leave"}"#, &f.listener, &f.store, &f.ingest);
        assert!(reply.is_none());
        assert!(f.listener.session().is_none());
    }

    #[tokio::test]
    async fn leave_when_not_joined_replies_not_joined() {
        let f = fixture();
        let reply = handle_message(r#"{"type":"leave"}"#, &f.listener, &f.store, &f.ingest);
        assert_matches!(
            reply,
            Some(ServerMessage::Error { code, .. }) if code == errors::NOT_JOINED
        );
    }
}
