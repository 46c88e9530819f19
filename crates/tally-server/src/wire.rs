//! WebSocket wire-format types.
//!
//! Every client operation names its session id explicitly; there is no
//! implicit "current" session on a connection beyond the join used to
//! select which broadcasts it receives.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tally_core::{ConnectionId, SessionId, SessionSnapshot, TallySnapshot};

/// Incoming message from a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Attach this connection to a session's broadcasts.
    Join {
        /// The session to join.
        session: SessionId,
    },
    /// Cast (or re-cast) a vote.
    Vote {
        /// The session voted in.
        session: SessionId,
        /// The chosen option.
        vote: String,
        /// Signed voter token.
        token: String,
    },
    /// Detach from the joined session.
    Leave,
}

/// Outgoing message to a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message after the upgrade completes.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Identifier assigned to this connection.
        connection_id: ConnectionId,
        /// ISO-8601 timestamp.
        timestamp: String,
    },
    /// Join succeeded; carries the current state so a late joiner is not
    /// blind until the next vote.
    Joined {
        /// The joined session.
        session: SessionId,
        /// Point-in-time state of the poll.
        snapshot: SessionSnapshot,
    },
    /// A tally update produced by one accepted vote.
    Tally {
        /// The session the vote was applied to.
        session: SessionId,
        /// Position of the vote in the session's applied order.
        seq: u64,
        /// Option → current count.
        tally: BTreeMap<String, u64>,
        /// Display name of the voter who triggered this update.
        voter: String,
        /// ISO-8601 timestamp.
        timestamp: String,
    },
    /// Request-scoped error, delivered only to the offending sender.
    Error {
        /// Machine-readable code (e.g. `SESSION_NOT_FOUND`).
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl ServerMessage {
    /// Build a `welcome` with the current UTC timestamp.
    pub fn welcome(connection_id: ConnectionId) -> Self {
        Self::Welcome {
            connection_id,
            timestamp: now_rfc3339(),
        }
    }

    /// Build a `tally` update from an applied-vote snapshot.
    pub fn tally(snapshot: TallySnapshot) -> Self {
        Self::Tally {
            session: snapshot.session,
            seq: snapshot.seq,
            tally: snapshot.tally,
            voter: snapshot.voter,
            timestamp: now_rfc3339(),
        }
    }

    /// Build an `error` reply.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::Value;

    // ── Inbound wire fixtures ───────────────────────────────────────

    #[test]
    fn wire_format_join() {
        let raw = r#"{"type":"join","session":"s1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_matches!(msg, ClientMessage::Join { session } if session.as_str() == "s1");
    }

    #[test]
    fn wire_format_vote() {
        let raw = r#"{"type":"vote","session":"s1","vote":"red","token":"tok_abc"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_matches!(
            msg,
            ClientMessage::Vote { session, vote, token }
                if session.as_str() == "s1" && vote == "red" && token == "tok_abc"
        );
    }

    #[test]
    fn wire_format_leave() {
        let raw = r#"{"type":"leave"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert_matches!(msg, ClientMessage::Leave);
    }

    #[test]
    fn vote_without_session_fails_to_parse() {
        // The original design's implicit current session is gone: a vote
        // that names no session is malformed.
        let raw = r#"{"type":"vote","vote":"red","token":"t"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"shout","session":"s1"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    // ── Outbound ────────────────────────────────────────────────────

    #[test]
    fn welcome_serializes_camel_case_connection_id() {
        let msg = ServerMessage::welcome(ConnectionId::from("c1"));
        let v: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "welcome");
        assert_eq!(v["connectionId"], "c1");
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn tally_update_carries_full_mapping_and_voter() {
        let snapshot = TallySnapshot {
            session: SessionId::from("s1"),
            seq: 3,
            tally: [("red".to_owned(), 1), ("blue".to_owned(), 2)]
                .into_iter()
                .collect(),
            voter: "alice".into(),
        };
        let v: Value = serde_json::to_value(ServerMessage::tally(snapshot)).unwrap();
        assert_eq!(v["type"], "tally");
        assert_eq!(v["session"], "s1");
        assert_eq!(v["seq"], 3);
        assert_eq!(v["tally"]["red"], 1);
        assert_eq!(v["tally"]["blue"], 2);
        assert_eq!(v["voter"], "alice");
    }

    #[test]
    fn error_reply_shape() {
        let v: Value =
            serde_json::to_value(ServerMessage::error("SESSION_NOT_FOUND", "no such session"))
                .unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], "SESSION_NOT_FOUND");
        assert_eq!(v["message"], "no such session");
    }

    #[test]
    fn joined_carries_snapshot() {
        let snapshot = SessionSnapshot {
            session_id: SessionId::from("s1"),
            options: vec!["red".into(), "blue".into()],
            tally: [("red".to_owned(), 0), ("blue".to_owned(), 0)]
                .into_iter()
                .collect(),
            voters: 0,
            seq: 0,
        };
        let msg = ServerMessage::Joined {
            session: SessionId::from("s1"),
            snapshot,
        };
        let v: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "joined");
        assert_eq!(v["snapshot"]["sessionId"], "s1");
        assert_eq!(v["snapshot"]["options"][0], "red");
    }

    #[test]
    fn server_message_roundtrip() {
        let msg = ServerMessage::error("INVALID_PARAMS", "bad");
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_matches!(back, ServerMessage::Error { code, .. } if code == "INVALID_PARAMS");
    }
}
