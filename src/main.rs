//! quizsock: a WebSocket quiz server
//!
//! Every connection gets its own quiz session:
//! - WebSocket handshake, then the first question
//! - Each answer is checked and answered with a verdict and the next prompt
//! - Replies are delivered strictly in order, one write at a time
//! - The server closes the connection once the last question is answered
//!
//! Configuration via CLI arguments, a TOML file, and an optional quiz file.

mod channel;
mod config;
mod quiz;
mod server;
mod session;
mod websocket;

use config::Config;
use server::{Server, ServerError};
use tracing::info;
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
        listen = %config.listen,
        workers = ?config.workers,
        max_connections = config.max_connections,
        questions = config.script.len(),
        case_sensitive = config.script.case_sensitive(),
        "Starting quizsock server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    let result: Result<(), ServerError> = runtime.block_on(async move {
        let server = Server::bind(config)?;
        server.run().await
    });

    result?;

    Ok(())
}
