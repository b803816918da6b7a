//! poll-echo server binary.

use poll_echo::config::Config;
use poll_echo::runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        port = config.port,
        max_connections = config.max_connections,
        buffer_size = config.buffer_size,
        poll_timeout_ms = config.poll_timeout.as_millis() as u64,
        "Starting poll-echo server"
    );

    match runtime::run(config) {
        Ok(summary) => {
            info!(?summary, "Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Server failed");
            Err(e)
        }
    }
}
