//! Progress event fan-out to per-file subscribers.
//!
//! Events for one file are published by the single worker holding its
//! lease, and each subscriber has its own bounded channel, so per-file
//! order is preserved end to end. Delivery is best-effort: a subscriber
//! that stops draining loses events (counted, never blocking the
//! pipeline), and can re-sync from the store via `current_state`. The
//! terminal event for a file drops its senders, which closes every
//! subscriber channel once drained.

use std::collections::HashMap;
use std::sync::Arc;

use calliq_core::{FileId, PipelineEvent};
use calliq_telemetry::PipelineMetrics;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Queued events per subscriber before drops start.
const SUBSCRIBER_BUFFER: usize = 64;

/// Receiving half of a progress subscription.
///
/// Yields `None` once the file's terminal event has been drained.
pub type ProgressReceiver = mpsc::Receiver<PipelineEvent>;

/// Fan-out hub for pipeline progress events.
pub struct ProgressBroadcaster {
    subscribers: RwLock<HashMap<FileId, Vec<mpsc::Sender<PipelineEvent>>>>,
    metrics: Arc<PipelineMetrics>,
}

impl ProgressBroadcaster {
    /// Create a broadcaster that counts drops on `metrics`.
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Subscribe to a file's event stream.
    ///
    /// Valid at any point in the file's life; a subscriber attaching after
    /// the terminal event gets a channel that closes on first receive and
    /// should read the outcome from the store instead.
    pub async fn subscribe(&self, file_id: &FileId) -> ProgressReceiver {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut subs = self.subscribers.write().await;
        subs.entry(file_id.clone()).or_default().push(tx);
        debug!(file_id = %file_id, "subscriber attached");
        rx
    }

    /// Deliver an event to every live subscriber of its file.
    ///
    /// Closed subscribers are pruned; full ones keep their place but lose
    /// this event. A terminal event ends the subscription list entirely.
    pub async fn publish(&self, event: &PipelineEvent) {
        let file_id = event.file_id();
        let mut subs = self.subscribers.write().await;
        if let Some(senders) = subs.get_mut(file_id) {
            senders.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.metrics.record_dropped_event();
                    warn!(file_id = %file_id, "subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
            if senders.is_empty() || event.is_terminal() {
                let _ = subs.remove(file_id);
            }
        }
    }

    /// Number of live subscribers for a file.
    pub async fn subscriber_count(&self, file_id: &FileId) -> usize {
        self.subscribers
            .read()
            .await
            .get(file_id)
            .map_or(0, Vec::len)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
