//! budgetchat TCP chat server - Entry Point
//!
//! Parses configuration, starts the RoomServer actor and accepts connections
//! until Ctrl-C.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use budget_chat::{serve, Config, RoomServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // RUST_LOG wins over --log-level
    // e.g., RUST_LOG=debug or RUST_LOG=budget_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("budget_chat={}", config.log_level))),
        )
        .init();

    let listener = TcpListener::bind(&config.bind).await?;
    info!("budgetchat listening on {}", listener.local_addr()?);

    let room = RoomServer::spawn();
    info!("RoomServer actor started");

    tokio::select! {
        _ = serve(listener, room, config) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown requested");
        }
    }

    Ok(())
}
