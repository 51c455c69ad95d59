//! rewrite-proxy
//!
//! Runs the proxy engine behind an axum listener with identity hooks.
//!
//! ```text
//!     Client Request      ┌──────────────────────────────────────────────────────┐
//!     ────────────────────┼─▶ axum host ─▶ translator ─▶ resolver ─▶ executor ───┼──▶ Backend
//!                         │      │         (+ hook)                     │        │
//!     Client Response     │      ▼                                      ▼        │
//!     ◀───────────────────┼── response ◀── relay (+ hook) ◀── response handle ◀──┼─── Backend
//!                         └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use rewrite_proxy::config::loader::load_config;
use rewrite_proxy::config::ProxyConfig;
use rewrite_proxy::observability::{logging, metrics};
use rewrite_proxy::{HttpServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "rewrite-proxy", version, about = "Request/response-rewriting reverse proxy")]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rewrite-proxy starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        backend = config.upstream.backend.as_deref().unwrap_or("same-origin"),
        streaming = config.upstream.streaming,
        read_timeout_ms = config.upstream.read_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::from_config(&config)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(shutdown.on_signal());

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
