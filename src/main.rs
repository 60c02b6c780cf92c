//! csv-bridge: a single-client TCP bridge for CSV records
//!
//! Accepts one peer at a time, parses each `x,y,z,scalar,tag` line it sends
//! and echoes it back with the numeric fields in canonical form.
//!
//! Features:
//! - Sequential peers on one listener, no restart between sessions
//! - `Disconnect` sentinel ends a session without stopping the server
//! - Malformed records are logged and skipped
//! - Ctrl-C closes the open connection and exits cleanly
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod server;
mod session;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        recv_buffer_size = config.recv_buffer_size,
        "Starting csv-bridge server"
    );

    let server = Server::bind(config).map_err(|e| {
        error!(error = %e, "Failed to bind listener");
        e
    })?;

    server.run().await?;
    Ok(())
}
