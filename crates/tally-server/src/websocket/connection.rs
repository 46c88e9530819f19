//! Listener handle for one connected client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tally_core::{ConnectionId, SessionId};

use crate::wire::ServerMessage;

/// One live client connection, registered with the broadcast hub.
///
/// The handle owns the sending half of the connection's outbound queue;
/// the receiving half is drained by the connection's write task. All sends
/// are non-blocking: a full queue drops the message and bumps a counter
/// so one slow client can never stall a broadcast.
pub struct Listener {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Session this listener currently receives broadcasts for.
    session: Mutex<Option<SessionId>>,
    /// Outbound queue to the connection's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When the connection was established.
    pub connected_at: Instant,
    /// Whether the client answered the most recent Ping.
    is_alive: AtomicBool,
    /// When the last Pong (or any liveness signal) arrived.
    last_pong: Mutex<Instant>,
    /// Lifetime count of messages dropped on a full queue.
    dropped: AtomicU64,
}

impl Listener {
    /// Create a handle around the sending half of an outbound queue.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            session: Mutex::new(None),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach this listener to a session's broadcasts. A second join
    /// replaces the first; a connection listens to at most one session.
    pub fn join(&self, session: SessionId) {
        *self.session.lock() = Some(session);
    }

    /// Detach from the joined session, returning it if there was one.
    pub fn leave(&self) -> Option<SessionId> {
        self.session.lock().take()
    }

    /// The currently joined session, if any.
    pub fn session(&self) -> Option<SessionId> {
        self.session.lock().clone()
    }

    /// Whether this listener receives broadcasts for `session`.
    pub fn is_joined_to(&self, session: &SessionId) -> bool {
        self.session.lock().as_ref() == Some(session)
    }

    /// Enqueue a pre-serialized frame without blocking.
    ///
    /// Returns `false` when the queue is full or the connection is gone;
    /// the dropped-message counter is bumped in that case.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and enqueue a [`ServerMessage`].
    pub fn send_message(&self, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Whether the write task side of the queue is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Lifetime count of dropped messages.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record a liveness signal (Pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat tick.
    ///
    /// Returns `true` if the client signalled liveness since the previous
    /// check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last liveness signal.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_listener() -> (Listener, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (Listener::new(ConnectionId::from("c1"), tx), rx)
    }

    #[test]
    fn starts_unjoined_and_alive() {
        let (listener, _rx) = make_listener();
        assert!(listener.session().is_none());
        assert!(!listener.is_joined_to(&SessionId::from("s1")));
        assert!(listener.check_alive());
    }

    #[test]
    fn join_replaces_previous_session() {
        let (listener, _rx) = make_listener();
        listener.join(SessionId::from("s1"));
        assert!(listener.is_joined_to(&SessionId::from("s1")));
        listener.join(SessionId::from("s2"));
        assert!(listener.is_joined_to(&SessionId::from("s2")));
        assert!(!listener.is_joined_to(&SessionId::from("s1")));
    }

    #[test]
    fn leave_returns_the_session_once() {
        let (listener, _rx) = make_listener();
        listener.join(SessionId::from("s1"));
        assert_eq!(listener.leave(), Some(SessionId::from("s1")));
        assert_eq!(listener.leave(), None);
    }

    #[tokio::test]
    async fn send_delivers_to_queue() {
        let (listener, mut rx) = make_listener();
        assert!(listener.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(1);
        let listener = Listener::new(ConnectionId::from("c2"), tx);
        assert!(listener.send(Arc::new("first".into())));
        assert!(!listener.send(Arc::new("second".into())));
        assert_eq!(listener.drop_count(), 1);
    }

    #[tokio::test]
    async fn closed_queue_drops_and_counts() {
        let (tx, rx) = mpsc::channel(8);
        let listener = Listener::new(ConnectionId::from("c3"), tx);
        drop(rx);
        assert!(listener.is_closed());
        assert!(!listener.send(Arc::new("gone".into())));
        assert_eq!(listener.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_message_serializes() {
        let (listener, mut rx) = make_listener();
        let ok = listener.send_message(&ServerMessage::error("NOT_JOINED", "join first"));
        assert!(ok);
        let frame = rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], "NOT_JOINED");
    }

    #[test]
    fn check_alive_resets_until_marked() {
        let (listener, _rx) = make_listener();
        assert!(listener.check_alive());
        assert!(!listener.check_alive());
        listener.mark_alive();
        assert!(listener.check_alive());
    }

    #[test]
    fn last_pong_elapsed_shrinks_on_mark() {
        let (listener, _rx) = make_listener();
        std::thread::sleep(Duration::from_millis(5));
        let before = listener.last_pong_elapsed();
        listener.mark_alive();
        assert!(listener.last_pong_elapsed() <= before);
    }
}
