//! # tallyd
//!
//! Tally server binary: wires the token authority, session store, ingest
//! loop, and broadcast hub together and serves HTTP + WebSocket.

#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_auth::TokenAuthority;
use tally_server::config::ServerConfig;
use tally_server::metrics;
use tally_server::server::TallyServer;

/// Tally live-polling server.
#[derive(Parser, Debug)]
#[command(name = "tallyd", about = "Tally live-polling server")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "7870")]
    port: u16,

    /// Shared secret for signing vote tokens. Falls back to the
    /// `TALLY_SECRET` environment variable.
    #[arg(long)]
    secret: Option<String>,

    /// Vote token lifetime in seconds.
    #[arg(long, default_value = "300")]
    token_ttl_secs: u64,

    /// Maximum concurrent WebSocket connections.
    #[arg(long)]
    max_connections: Option<usize>,
}

impl Cli {
    /// Resolve the token secret from the flag or the environment.
    fn resolve_secret(&self) -> Result<String> {
        if let Some(secret) = &self.secret {
            return Ok(secret.clone());
        }
        match std::env::var("TALLY_SECRET") {
            Ok(secret) if !secret.is_empty() => Ok(secret),
            _ => bail!("no token secret: pass --secret or set TALLY_SECRET"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let secret = args.resolve_secret()?;
    let tokens = TokenAuthority::new(
        secret.as_bytes(),
        Duration::from_secs(args.token_ttl_secs),
    );

    let metrics_handle = metrics::install_recorder();

    let mut config = ServerConfig {
        host: args.host,
        port: args.port,
        ..ServerConfig::default()
    };
    if let Some(max_connections) = args.max_connections {
        config.max_connections = max_connections;
    }

    let server = TallyServer::new(config, tokens, metrics_handle);
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    tracing::info!("tallyd listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    server.shutdown();
    let _ = handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}
