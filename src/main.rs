//! chat-relay: A single-room TCP chat server
//!
//! Clients connect over TCP and exchange length-prefixed text frames:
//! - Every received line is timestamped and broadcast to all members
//! - Newcomers get a welcome and the last 100 broadcast lines
//! - Joins and departures are announced to the other members
//! - A configurable user limit turns away connections once the room is full
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocol;
mod room;
mod server;
mod session;

use config::Config;
use server::Server;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        ip = %config.listen_address,
        port = config.listen_port,
        user_limit = config.user_limit,
        workers = config.workers,
        verbose = config.verbose,
        "Starting chat-relay server"
    );

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed to start");
            ExitCode::FAILURE
        }
    }
}

/// Run the server on a runtime with exactly `config.workers` worker threads.
fn run(config: Config) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .thread_name("worker")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::bind(&config)?;
        server.run().await;
        Ok::<(), std::io::Error>(())
    })
}
