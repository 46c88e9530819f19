//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the tally server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Interval between server-initiated Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client that has not answered a Ping for this long.
    pub heartbeat_timeout_secs: u64,
    /// Depth of each listener's outbound send queue. Deliveries beyond
    /// this are dropped rather than blocking the broadcaster.
    pub send_queue_depth: usize,
    /// Depth of each session's ingest queue. Submissions beyond this are
    /// rejected with a backpressure error rather than blocking the reader.
    pub ingest_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_depth: 256,
            ingest_queue_depth: 1024,
        }
    }
}
