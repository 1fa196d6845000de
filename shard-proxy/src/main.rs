// ABOUTME: shard-proxy binary: parses config, starts the shard router, serves HTTP
// ABOUTME: Shuts the router down after the server drains on Ctrl+C or SIGTERM

use clap::Parser;
use dotenv::dotenv;
use shard_proxy::cli::{Cli, LogFormat};
use shard_ring::ShardRouter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = cli.router_config()?;
    let (shards, connector) = cli.connector()?;
    tracing::info!(?shards, replicas = config.replicas, "Initializing hash ring");

    let router = Arc::new(ShardRouter::start(config, Arc::new(connector), shards).await?);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Sharding proxy listening on {}", addr);

    axum::serve(listener, shard_proxy::routes(router.clone()))
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    router.shutdown().await;
    tracing::info!("Sharding proxy stopped");
    Ok(())
}
