//! codoc daemon (codocd)
//!
//! The server process for codoc - real-time document collaboration.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (WebSocket on 8900, TCP on 8901)
//! codocd
//!
//! # Custom ports
//! codocd --ws-port 9000 --tcp-port 9001
//!
//! # With persistence
//! codocd --db /var/lib/codoc/documents.db
//!
//! # With a session-token table
//! codocd --tokens /etc/codoc/tokens.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use codoc_core::Hub;
use codoc_storage::{DocumentStore, MemoryStore, SqliteStore};
use codoc_transport::{
    LivenessSweeper, StaticTokenResolver, TcpServer, TokenResolver, WebSocketServer,
};

/// codoc daemon - real-time document collaboration server
#[derive(Parser, Debug)]
#[command(name = "codocd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket port to listen on
    #[arg(long, env = "CODOC_WS_PORT", default_value = "8900")]
    ws_port: u16,

    /// TCP port to listen on
    #[arg(long, env = "CODOC_TCP_PORT", default_value = "8901")]
    tcp_port: u16,

    /// Bind address
    #[arg(long, env = "CODOC_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CODOC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Disable TCP server
    #[arg(long)]
    no_tcp: bool,

    /// Disable WebSocket server
    #[arg(long)]
    no_ws: bool,

    /// SQLite database path for persistence (default: in-memory only)
    #[arg(long, env = "CODOC_DB")]
    db: Option<PathBuf>,

    /// TOML file with the session-token table (default: guests only)
    #[arg(long, env = "CODOC_TOKENS")]
    tokens: Option<PathBuf>,

    /// Presence heartbeat timeout in seconds
    #[arg(long, env = "CODOC_PRESENCE_TIMEOUT", default_value = "5")]
    presence_timeout: u64,

    /// Presence sweep interval in seconds
    #[arg(long, env = "CODOC_SWEEP_INTERVAL", default_value = "2")]
    sweep_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    // Select the document store
    let store: Arc<dyn DocumentStore> = if let Some(db_path) = &args.db {
        info!(path = %db_path.display(), "Initializing SQLite persistence");
        match SqliteStore::new(db_path) {
            Ok(store) => {
                info!("SQLite persistence enabled");
                Arc::new(store)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize SQLite, running in-memory only");
                Arc::new(MemoryStore::new())
            }
        }
    } else {
        info!("Running in-memory only (no --db specified)");
        Arc::new(MemoryStore::new())
    };

    // Load the token table
    let resolver: Arc<dyn TokenResolver> = match &args.tokens {
        Some(path) => {
            let resolver = StaticTokenResolver::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load token table: {}", e))?;
            info!(path = %path.display(), tokens = resolver.len(), "Token table loaded");
            Arc::new(resolver)
        }
        None => {
            info!("No token table configured, accepting guests only");
            Arc::new(StaticTokenResolver::new())
        }
    };

    let hub = Arc::new(Hub::new(store));

    info!(
        ws_port = args.ws_port,
        tcp_port = args.tcp_port,
        bind = %args.bind,
        presence_timeout = args.presence_timeout,
        sweep_interval = args.sweep_interval,
        "Starting codoc daemon"
    );

    // Start servers
    let mut handles = Vec::new();

    if !args.no_ws {
        let ws_addr: SocketAddr = format!("{}:{}", args.bind, args.ws_port).parse()?;
        let ws_server = WebSocketServer::new(hub.clone(), resolver.clone(), ws_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws_server.run().await {
                tracing::error!(error = %e, "WebSocket server error");
            }
        }));
    }

    if !args.no_tcp {
        let tcp_addr: SocketAddr = format!("{}:{}", args.bind, args.tcp_port).parse()?;
        let tcp_server = TcpServer::new(hub.clone(), resolver.clone(), tcp_addr);
        handles.push(tokio::spawn(async move {
            if let Err(e) = tcp_server.run().await {
                tracing::error!(error = %e, "TCP server error");
            }
        }));
    }

    if handles.is_empty() {
        anyhow::bail!("At least one transport must be enabled");
    }

    // Start the liveness sweeper
    let sweeper = LivenessSweeper::new(
        hub,
        Duration::from_secs(args.sweep_interval),
        Duration::from_secs(args.presence_timeout),
    );
    handles.push(sweeper.spawn());

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    Ok(())
}
