//! Room Relay Server
//!
//! WebSocket pub/sub relay. Clients subscribe to named rooms over `/ws`;
//! messages reach them through HTTP `/push` and `/broadcast` calls.

mod config;
mod registry;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::RelayConfig;
use server::RelayServer;

/// Room Relay Server
///
/// WebSocket pub/sub relay with HTTP push and broadcast
#[derive(Parser, Debug)]
#[command(name = "room-relay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    bind: Option<String>,

    /// TOML config file; command line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report recipient counts in push/broadcast replies
    #[arg(long)]
    report_delivery: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> RelayConfig {
        RelayConfig {
            bind: self.bind.clone(),
            port: self.port,
            report_delivery: self.report_delivery.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Room Relay v{}", env!("CARGO_PKG_VERSION"));

    // Layer CLI flags over the config file
    let file_config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            RelayConfig::load(path)?
        }
        None => RelayConfig::default(),
    };
    let config = file_config.overlay(args.overrides()).into_server_config();

    if config.report_delivery {
        info!("Delivery counts enabled in push/broadcast replies");
    }

    // Create the relay server
    let server = Arc::new(RelayServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_without_flags() {
        let args = Args::parse_from(["room-relay"]);
        assert_eq!(args.overrides(), RelayConfig::default());
    }

    #[test]
    fn test_args_override_file() {
        let args = Args::parse_from(["room-relay", "--port", "9001", "--report-delivery"]);
        let file = RelayConfig::from_toml("bind = \"127.0.0.1\"\nport = 9000").unwrap();

        let config = file.overlay(args.overrides()).into_server_config();
        assert_eq!(config.socket_addr(), "127.0.0.1:9001");
        assert!(config.report_delivery);
    }
}
