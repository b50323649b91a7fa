//! Embedding surface: one [`Engine`] per process.
//!
//! The engine owns the store, the progress hub and the worker pool. It is
//! handed real capability adapters at construction and exposes the queue
//! operations a frontend needs: enqueue, cancel, retry analysis, subscribe,
//! and the stored outputs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use calliq_core::{
    AnalysisRecord, DiarizationRecord, FileId, PipelineEvent, TranscriptionResult,
};
use calliq_settings::CalliqSettings;
use calliq_store::{
    ConnectionConfig, EnqueueOutcome, FileRecord, FileSnapshot, NewFile, PipelineStore,
    StageCheckpoint, CANCELLED_ERROR,
};
use calliq_telemetry::{MetricsSnapshot, PipelineMetrics};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{ProgressBroadcaster, ProgressReceiver};
use crate::errors::{EngineError, Result};
use crate::orchestrator::{CapabilitySet, PipelineContext};
use crate::{validate, worker};

/// Time allowed for workers to finish their in-flight checkpoint writes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The pipeline engine: queue, workers and progress fan-out.
///
/// Construction opens the store but starts nothing; [`start`](Self::start)
/// recovers interrupted files and brings up the workers, and
/// [`shutdown`](Self::shutdown) drains them. Files interrupted by an
/// unclean exit resume from their recorded stage on the next start.
pub struct Engine {
    ctx: Arc<PipelineContext>,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Open the store at the configured path and assemble the engine.
    pub fn new(settings: CalliqSettings, capabilities: CapabilitySet) -> Result<Self> {
        let db_path = settings.storage.resolved_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EngineError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let config = ConnectionConfig {
            pool_size: settings.storage.pool_size,
            busy_timeout_ms: u32::try_from(settings.storage.busy_timeout_ms)
                .unwrap_or(u32::MAX),
            cache_size_kib: i64::try_from(settings.storage.cache_size_kib)
                .unwrap_or(i64::MAX),
        };
        let store = Arc::new(PipelineStore::open(&db_path, &config)?);
        Ok(Self::with_store(store, settings, capabilities))
    }

    /// Assemble the engine over an already-open store.
    ///
    /// For tests and embedders that manage the database themselves.
    #[must_use]
    pub fn with_store(
        store: Arc<PipelineStore>,
        settings: CalliqSettings,
        capabilities: CapabilitySet,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let gpu_slots = Arc::new(Semaphore::new(settings.pipeline.gpu_slots.max(1)));
        let ctx = Arc::new(PipelineContext {
            store,
            broadcaster: Arc::new(ProgressBroadcaster::new(metrics.clone())),
            capabilities,
            settings: Arc::new(settings),
            metrics,
            gpu_slots,
        });
        Self {
            ctx,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Recover interrupted files and start the worker pool.
    ///
    /// Running rows left behind by a previous process go back to the queue
    /// first, so they are leased again ahead of the fresh backlog. Calling
    /// `start` on a running engine is a no-op.
    pub fn start(&self) -> Result<()> {
        let recovered = self.ctx.store.recover_interrupted()?;
        if recovered > 0 {
            info!(recovered, "requeued files left running by a previous process");
        }
        self.ctx.refresh_queue_depth();

        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            debug!("start called on a running engine");
            return Ok(());
        }
        *workers = worker::spawn_workers(self.ctx.clone(), self.shutdown.clone());
        info!(workers = workers.len(), "engine started");
        Ok(())
    }

    /// Stop the workers, draining in-flight files back to the queue.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }
        info!(workers = handles.len(), "draining workers");
        match tokio::time::timeout(SHUTDOWN_GRACE, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(err) = result {
                        warn!(error = %err, "worker task ended abnormally");
                    }
                }
                info!("engine stopped");
            }
            Err(_) => warn!("workers did not drain within the shutdown grace period"),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queue operations
    // ─────────────────────────────────────────────────────────────────────

    /// Queue an audio file for processing.
    ///
    /// The content is hashed for dedupe: a file already queued, running or
    /// finished usefully comes back as [`EnqueueOutcome::Existing`] instead
    /// of a new row. `force` skips the dedupe and always creates a fresh
    /// record; previously failed files never need it.
    pub async fn enqueue(&self, path: &Path, force: bool) -> Result<EnqueueOutcome> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| EngineError::InvalidPath(path.display().to_string()))?
            .to_owned();
        let metadata = std::fs::metadata(path).map_err(|source| EngineError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(EngineError::InvalidPath(path.display().to_string()));
        }

        let hash_path = path.to_owned();
        let content_hash = tokio::task::spawn_blocking(move || validate::hash_file(&hash_path))
            .await
            .map_err(|err| EngineError::Io {
                path: path.display().to_string(),
                source: std::io::Error::other(err),
            })?
            .map_err(|source| EngineError::Io {
                path: path.display().to_string(),
                source,
            })?;

        let outcome = self.ctx.store.enqueue(
            &NewFile {
                file_name,
                audio_path: path.display().to_string(),
                content_hash,
                size_bytes: metadata.len(),
            },
            force,
        )?;
        if outcome.is_created() {
            info!(
                file_id = %outcome.record().id,
                file = %outcome.record().file_name,
                "file enqueued"
            );
        } else {
            info!(file_id = %outcome.record().id, "duplicate content, existing record returned");
        }
        self.ctx.refresh_queue_depth();
        Ok(outcome)
    }

    /// Request cancellation of a queued or running file.
    ///
    /// A queued file goes terminal right away and its events are published
    /// here; a running file is flagged and finalized by its worker at the
    /// next checkpoint write. Returns `false` if the file was already
    /// terminal.
    pub async fn cancel(&self, file_id: &FileId) -> Result<bool> {
        if !self.ctx.store.cancel(file_id)? {
            return Ok(false);
        }
        let record = self.ctx.store.get_file(file_id)?;
        if record.status.is_terminal() {
            // No worker owns a queued file, so the terminal events are ours
            // to publish.
            self.ctx
                .broadcaster
                .publish(&PipelineEvent::failed(file_id.clone(), None, CANCELLED_ERROR))
                .await;
            self.ctx
                .broadcaster
                .publish(&PipelineEvent::completed(file_id.clone(), record.status))
                .await;
            self.ctx.metrics.record_failed();
            self.ctx.refresh_queue_depth();
        }
        Ok(true)
    }

    /// Requeue a degraded file so only its analysis stage reruns.
    pub fn retry_analysis(&self, file_id: &FileId) -> Result<FileRecord> {
        let record = self.ctx.store.retry_analysis(file_id)?;
        self.ctx.refresh_queue_depth();
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────

    /// Current snapshot plus a live event stream for one file.
    ///
    /// The snapshot is read after the subscription registers, so any
    /// transition lands in at least one of the two.
    pub async fn subscribe(&self, file_id: &FileId) -> Result<(FileSnapshot, ProgressReceiver)> {
        let _ = self.ctx.store.get_file(file_id)?;
        let receiver = self.ctx.broadcaster.subscribe(file_id).await;
        let snapshot = self.ctx.store.current_state(file_id)?;
        Ok((snapshot, receiver))
    }

    /// Stored record for a file.
    pub fn file(&self, file_id: &FileId) -> Result<FileRecord> {
        Ok(self.ctx.store.get_file(file_id)?)
    }

    /// Compact progress view of a file.
    pub fn current_state(&self, file_id: &FileId) -> Result<FileSnapshot> {
        Ok(self.ctx.store.current_state(file_id)?)
    }

    /// Stored transcription, once transcription has completed.
    pub fn transcription(&self, file_id: &FileId) -> Result<Option<TranscriptionResult>> {
        Ok(self.ctx.store.get_transcription(file_id)?)
    }

    /// Stored diarization, once diarization has completed.
    pub fn diarization(&self, file_id: &FileId) -> Result<Option<DiarizationRecord>> {
        Ok(self.ctx.store.get_diarization(file_id)?)
    }

    /// Stored analysis. Absent on degraded files.
    pub fn analysis(&self, file_id: &FileId) -> Result<Option<AnalysisRecord>> {
        Ok(self.ctx.store.get_analysis(file_id)?)
    }

    /// Checkpoint audit trail for a file, oldest first.
    pub fn checkpoints(&self, file_id: &FileId) -> Result<Vec<StageCheckpoint>> {
        Ok(self.ctx.store.checkpoints(file_id)?)
    }

    /// Point-in-time pipeline metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
