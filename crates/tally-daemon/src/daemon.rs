//! Process driver: binds the sockets, starts the pipeline and the scrape
//! server, and reacts to signals until told to stop.
//!
//! Signals:
//! - `SIGUSR1`                    : reload metric specs
//! - `SIGHUP`                     : reopen the log file
//! - `SIGINT`, `SIGTERM`, `SIGQUIT` : shut down
//!
//! Cancelling the state's shutdown token stops the daemon the same way.
//!
//! Failing to bind either listener is fatal before anything starts. A
//! processor panic or a dead scrape server is fatal at runtime. Every exit
//! path removes the ingestion socket file.

use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::{timeout, Duration};

use tally_core::error::{Result, TallyError};

use crate::app_state::AppState;
use crate::pipeline::{listener, Pipeline, PipelineSettings};
use crate::reload::ReloadController;
use crate::router;

/// Grace period for in-flight scrapes on shutdown.
const HTTP_DRAIN: Duration = Duration::from_secs(5);

struct Signals {
    reload: Signal,
    reopen_log: Signal,
    terminate: Signal,
    interrupt: Signal,
    quit: Signal,
}

impl Signals {
    fn install() -> Result<Self> {
        Ok(Self {
            reload: signal(SignalKind::user_defined1())?,
            reopen_log: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
        })
    }
}

pub async fn run(state: AppState) -> Result<()> {
    let cfg = state.cfg().daemon.clone();
    let spec_path: PathBuf = state
        .spec_path()
        .map(PathBuf::from)
        .ok_or_else(|| TallyError::Config("no metric spec file configured".into()))?;
    let addr = cfg.listen_addr()?;
    let mut signals = Signals::install()?;

    let socket = listener::bind(&cfg.socket)?;
    let http = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            drop(socket);
            cleanup_socket(&cfg.socket);
            return Err(TallyError::Internal(format!(
                "bind scrape listener {addr} failed: {e}"
            )));
        }
    };
    tracing::info!(%addr, path = %cfg.path, "serving scrapes");

    let pipeline = Pipeline::spawn(
        socket,
        PipelineSettings {
            workers: cfg.workers,
            queue_capacity: cfg.queue_capacity,
            max_payload_bytes: cfg.max_payload_bytes,
            read_timeout: cfg.read_timeout(),
        },
        state.stats(),
        state.shutdown().clone(),
    );

    let mut controller = ReloadController::new(
        state.registry(),
        spec_path,
        pipeline.updates(),
        state.stats(),
        state.fatal().clone(),
    );
    controller.start();

    let server = {
        let app = router::build_router(state.clone());
        let shutdown = state.shutdown().clone();
        let fatal = state.fatal().clone();
        tokio::spawn(async move {
            let served = axum::serve(http, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "scrape server failed");
                fatal.cancel();
            }
        })
    };

    let outcome = loop {
        tokio::select! {
            _ = state.fatal().cancelled() => {
                break Err(TallyError::Internal("fatal runtime error, shutting down".into()));
            }
            _ = signals.reload.recv() => {
                // failures are logged by the controller; the old set stays live
                let _ = controller.reload().await;
            }
            _ = signals.reopen_log.recv() => {
                match state.log().reopen() {
                    Ok(()) => tracing::info!("log output reopened"),
                    Err(e) => tracing::error!(error = %e, "reopen log output failed"),
                }
            }
            _ = state.shutdown().cancelled() => break Ok(()),
            _ = signals.terminate.recv() => break Ok(()),
            _ = signals.interrupt.recv() => break Ok(()),
            _ = signals.quit.recv() => break Ok(()),
        }
    };
    if outcome.is_ok() {
        tracing::info!("shutdown requested, stopping");
    }

    state.shutdown().cancel();
    pipeline.join().await;
    controller.shutdown().await;
    if timeout(HTTP_DRAIN, server).await.is_err() {
        tracing::warn!("scrape server did not stop within {:?}", HTTP_DRAIN);
    }
    cleanup_socket(&cfg.socket);

    outcome
}

fn cleanup_socket(path: &Path) {
    if let Err(e) = listener::remove_socket(path) {
        tracing::warn!(error = %e, "socket cleanup failed");
    }
}
