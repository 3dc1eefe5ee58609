//! Ingestion pipeline: Listener → Worker Pool → Processor.
//!
//! Stages talk only through `flume` channels. Both queues are bounded by
//! `queue_capacity`, which defaults to 0 (rendezvous): a producer waits until
//! a consumer takes the item, and that wait is the only admission control.
//!
//! The listener and workers live for the whole process. Processors come and
//! go per generation (see `processor::Generation`) on the same update queue,
//! so a reload never loses an accepted connection.

pub mod listener;
pub mod processor;
pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tally_core::MetricUpdate;

pub use processor::Generation;

/// Pipeline counters, for debug logs and tests.
#[derive(Default)]
pub struct PipelineStats {
    accepted: AtomicU64,
    decoded: AtomicU64,
    applied: AtomicU64,
    dropped: AtomicU64,
}

impl PipelineStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn add_decoded(&self, n: u64) {
        self.decoded.fetch_add(n, Ordering::Relaxed);
    }
    pub(crate) fn inc_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_payload_bytes: usize,
    pub read_timeout: Duration,
}

/// Handles on the long-lived stages.
pub struct Pipeline {
    updates: flume::Receiver<MetricUpdate>,
    listener: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Spawn the accept loop and the worker pool on a bound socket.
    pub fn spawn(
        listener: UnixListener,
        settings: PipelineSettings,
        stats: Arc<PipelineStats>,
        shutdown: CancellationToken,
    ) -> Self {
        let (conn_tx, conn_rx) = flume::bounded::<UnixStream>(settings.queue_capacity);
        let (update_tx, update_rx) = flume::bounded::<MetricUpdate>(settings.queue_capacity);

        let listener = tokio::spawn(listener::run(
            listener,
            conn_tx,
            Arc::clone(&stats),
            shutdown.clone(),
        ));

        let workers = (0..settings.workers.max(1))
            .map(|id| {
                tokio::spawn(worker::run(
                    id,
                    conn_rx.clone(),
                    update_tx.clone(),
                    settings.clone(),
                    Arc::clone(&stats),
                    shutdown.clone(),
                ))
            })
            .collect();

        tracing::info!(
            workers = settings.workers.max(1),
            queue_capacity = settings.queue_capacity,
            "ingestion pipeline started"
        );

        Self {
            updates: update_rx,
            listener,
            workers,
            stats,
        }
    }

    /// Receiving end of the update queue, shared by successive processors.
    pub fn updates(&self) -> flume::Receiver<MetricUpdate> {
        self.updates.clone()
    }

    /// Wait for the listener and workers after the shutdown token fired.
    pub async fn join(self) {
        let _ = self.listener.await;
        for w in self.workers {
            let _ = w.await;
        }
        tracing::debug!(
            accepted = self.stats.accepted(),
            decoded = self.stats.decoded(),
            applied = self.stats.applied(),
            dropped = self.stats.dropped(),
            "ingestion pipeline stopped"
        );
    }
}
