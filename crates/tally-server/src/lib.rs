//! # tally-server
//!
//! Axum HTTP + WebSocket server for live polls.
//!
//! - HTTP surface: login (token issuance), session create/read/teardown,
//!   health check, Prometheus metrics
//! - WebSocket gateway: join/vote wire protocol, per-connection listener
//!   handles, heartbeat, tally fan-out
//! - Ingest loop: one single-writer worker per session turning concurrent
//!   vote submissions into ordered apply-then-broadcast steps
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod server;
pub mod websocket;
pub mod wire;
