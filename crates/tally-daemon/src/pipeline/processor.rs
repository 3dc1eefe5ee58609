//! Processor generations.
//!
//! Exactly one processor consumes the update queue at a time. A generation
//! ends when its token is cancelled: it applies whatever is already buffered
//! and returns. Updates still held by blocked workers stay in the channel and
//! go to the next generation, so rotation drops nothing.
//!
//! A panic inside a processor is caught at the task boundary and reported by
//! cancelling the `fatal` token; the daemon treats that as a reason to exit
//! rather than keep accepting updates nobody applies.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tally_core::MetricUpdate;

use super::PipelineStats;
use crate::registry::Registry;

/// Handle on one running processor.
pub struct Generation {
    id: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Generation {
    pub fn spawn(
        id: u64,
        registry: Arc<Registry>,
        updates: flume::Receiver<MetricUpdate>,
        stats: Arc<PipelineStats>,
        fatal: CancellationToken,
    ) -> Self {
        let token = CancellationToken::new();
        let handle = supervise(id, run(id, registry, updates, stats, token.clone()), fatal);
        tracing::info!(generation = id, "processor started");
        Self { id, token, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel and wait until the processor has drained and exited.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(generation = self.id, error = %e, "processor task failed");
        }
        tracing::info!(generation = self.id, "processor stopped");
    }
}

/// Spawn `task`; a panic inside it cancels `fatal` instead of unwinding
/// into the runtime.
fn supervise<F>(id: u64, task: F, fatal: CancellationToken) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            tracing::error!(
                generation = id,
                panic = %panic_message(panic.as_ref()),
                "processor panicked"
            );
            fatal.cancel();
        }
    })
}

async fn run(
    id: u64,
    registry: Arc<Registry>,
    updates: flume::Receiver<MetricUpdate>,
    stats: Arc<PipelineStats>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                let buffered = updates.len();
                for update in updates.try_iter().take(buffered) {
                    apply(&registry, &stats, &update);
                }
                tracing::debug!(generation = id, drained = buffered, "processor drained");
                return;
            }
            next = updates.recv_async() => match next {
                Ok(update) => apply(&registry, &stats, &update),
                Err(_) => {
                    tracing::debug!(generation = id, "update queue closed");
                    return;
                }
            },
        }
    }
}

fn apply(registry: &Registry, stats: &PipelineStats, update: &MetricUpdate) {
    match registry.handle(update) {
        Ok(()) => stats.inc_applied(),
        Err(e) => {
            stats.inc_dropped();
            tracing::warn!(
                metric = %update.name,
                method = %update.method,
                class = e.class().as_str(),
                error = %e,
                "update dropped"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
