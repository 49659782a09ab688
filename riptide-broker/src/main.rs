//! The riptide daemon.
//!
//! CLI-less: behavior comes entirely from the configuration table (see
//! [`riptide_broker::config`]). Runs until interrupted.

use riptide_broker::{Broker, BrokerConfig, PidFile};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match BrokerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured filter when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let _pidfile = match config.pid_file.clone() {
        Some(path) => match PidFile::create(path) {
            Ok(pidfile) => Some(pidfile),
            Err(e) => {
                error!("failed to create pidfile: {e}");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut broker = match Broker::new(config) {
        Ok(broker) => broker,
        Err(e) => {
            error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = broker.start().await {
        error!("failed to start broker: {e}");
        std::process::exit(1);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, exiting gracefully"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    if let Err(e) = broker.shutdown().await {
        error!("error during shutdown: {e}");
    }
}
