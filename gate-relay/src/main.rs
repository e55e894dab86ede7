//! gate-relay binary entry point.
//!
//! Usage:
//! ```bash
//! gate-relay --config gate.toml
//! gate-relay --help
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zerok_gate_relay::audit::TracingSink;
use zerok_gate_relay::cleanup::spawn_cleanup_task;
use zerok_gate_relay::config::Config;
use zerok_gate_relay::http::build_router;
use zerok_gate_relay::storage::SqliteGraph;
use zerok_gate_relay::Gateway;

/// Authorization gateway for a graph-sync relay.
#[derive(Debug, Parser)]
#[command(name = "gate-relay", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!("gate-relay v{} starting", env!("CARGO_PKG_VERSION"));

    let graph = SqliteGraph::new(&config.storage.database)
        .await
        .with_context(|| format!("opening {}", config.storage.database.display()))?;

    let bind_address = config.http.bind_address.clone();
    let cleanup_config = config.cleanup.clone();
    let (gateway, drain) = Gateway::from_config(config, Arc::new(graph));
    let gateway = Arc::new(gateway);

    let audit_task = drain.spawn(Arc::new(TracingSink));
    let cleanup_task = spawn_cleanup_task(gateway.grants().clone(), cleanup_config);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    tracing::info!("HTTP listening on {}", bind_address);

    axum::serve(listener, build_router(gateway))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    cleanup_task.abort();
    audit_task.abort();
    tracing::info!("gate-relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
