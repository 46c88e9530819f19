//! WebSocket connection lifecycle, from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use tally_core::ConnectionId;

use crate::server::AppState;
use crate::wire::ServerMessage;

use super::connection::Listener;
use super::handler::handle_message;

/// Run one client connection to completion.
///
/// 1. Registers a listener handle with the broadcast hub
/// 2. Sends a `welcome` carrying the connection id
/// 3. Dispatches incoming frames through the message handler
/// 4. Forwards broadcasts and replies via the outbound queue
/// 5. Pings periodically and disconnects unresponsive clients
/// 6. Unregisters on disconnect (safe against in-flight broadcasts)
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_ws_session(ws: WebSocket, connection_id: ConnectionId, state: AppState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(state.config.send_queue_depth);
    let listener = Arc::new(Listener::new(connection_id.clone(), send_tx));

    let connected_at = Instant::now();
    info!("client connected");
    counter!(crate::metrics::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).increment(1.0);

    state.hub.register(listener.clone()).await;

    // First frame: tell the client who it is.
    if let Ok(json) = serde_json::to_string(&ServerMessage::welcome(connection_id.clone())) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder with periodic Ping and liveness checks.
    let ping_interval = Duration::from_secs(state.config.heartbeat_interval_secs);
    let pong_timeout = Duration::from_secs(state.config.heartbeat_timeout_secs);
    let outbound_listener = listener.clone();
    let outbound_cancel = state.cancel.clone();
    let outbound = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        // Skip the immediate first tick.
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if ws_tx.send(Message::Text(frame.as_str().to_owned().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if !outbound_listener.check_alive()
                        && outbound_listener.last_pong_elapsed() > pong_timeout
                    {
                        warn!("client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Inbound loop.
    loop {
        let message = tokio::select! {
            message = ws_rx.next() => message,
            () = state.cancel.cancelled() => break,
        };
        let Some(Ok(message)) = message else { break };

        // Accept Binary frames as UTF-8 text; some clients send them.
        let text = match message {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_owned()),
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                listener.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };

        if let Some(reply) = handle_message(&text, &listener, &state.store, &state.ingest) {
            if !listener.send_message(&reply) {
                debug!("failed to enqueue reply (queue full or closed)");
            }
        }
    }

    info!("client disconnected");
    counter!(crate::metrics::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(crate::metrics::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connected_at.elapsed().as_secs_f64());
    outbound.abort();
    state.hub.unregister(&connection_id).await;
}
