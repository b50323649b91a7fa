//! Worker pool: lease, process, repeat.
//!
//! Workers coordinate only through the store's lease protocol, so the pool
//! can span processes. An empty queue is polled on an interval; there is no
//! in-process wakeup channel to keep the single-process and multi-process
//! deployments on the same code path.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::orchestrator::{process_file, PipelineContext};

/// Spawn the configured number of worker tasks.
pub(crate) fn spawn_workers(
    ctx: Arc<PipelineContext>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..ctx.settings.pipeline.workers.max(1))
        .map(|index| {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker_loop(index, &ctx, &shutdown).await })
        })
        .collect()
}

/// Lease-and-process loop for one worker.
async fn worker_loop(index: usize, ctx: &PipelineContext, shutdown: &CancellationToken) {
    info!(worker = index, "worker started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let leased = match ctx.store.lease_next(ctx.settings.pipeline.lease_secs) {
            Ok(leased) => leased,
            Err(err) => {
                // Treat a failed lease query like an empty queue and let the
                // poll interval pace the retries.
                error!(worker = index, error = %err, "lease query failed");
                None
            }
        };

        match leased {
            Some(record) => {
                ctx.metrics.worker_started();
                let outcome = process_file(ctx, record, shutdown).await;
                ctx.metrics.worker_finished();
                debug!(worker = index, outcome = ?outcome, "file released");
                ctx.refresh_queue_depth();
            }
            None => {
                ctx.refresh_queue_depth();
                let idle = Duration::from_millis(ctx.settings.pipeline.poll_interval_ms);
                tokio::select! {
                    () = tokio::time::sleep(idle) => {}
                    () = shutdown.cancelled() => break,
                }
            }
        }
    }
    info!(worker = index, "worker stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
