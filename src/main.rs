//! Line relay - Entry Point
//!
//! Reads configuration, binds the listener and accepts connections.

use std::env;

use tracing_subscriber::EnvFilter;

use line_relay::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=line_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("line_relay=info")),
        )
        .init();

    // Bind address from the first argument, tuning from the environment
    let config = ServerConfig::from_env_and_args(env::args().skip(1))?;

    // Runs until a fatal registry defect
    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
