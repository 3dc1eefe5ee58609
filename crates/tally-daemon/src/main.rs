//! tally-daemon
//!
//! Collects metric updates pushed by local processes over a unix socket and
//! exposes the aggregates for Prometheus to scrape.

use std::process::ExitCode;

use clap::Parser;

use tally_daemon::{app_state::AppState, config::Cli, daemon, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match Cli::parse().into_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("tally-daemon: {e}");
            return ExitCode::FAILURE;
        }
    };

    let log = match logging::LogHandle::from_config(cfg.daemon.log.as_deref()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("tally-daemon: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&log);

    let state = match AppState::new(cfg, log) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, class = e.class().as_str(), "startup failed");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tally-daemon starting");
    match daemon::run(state).await {
        Ok(()) => {
            tracing::info!("tally-daemon stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, class = e.class().as_str(), "tally-daemon exiting");
            ExitCode::FAILURE
        }
    }
}
