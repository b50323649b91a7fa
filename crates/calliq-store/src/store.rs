//! High-level pipeline store wrapping a connection pool.
//!
//! All write methods are transactional, so a crash between statements never
//! leaves a half-updated file. Checkpoint writes double as the cancellation
//! observation points: every one of them re-reads the row first and, when
//! `cancel_requested` is set, finalizes the file instead of proceeding.

use std::path::Path;

use calliq_core::{CheckpointKind, FileId, FileStatus, PipelineStage};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::errors::{Result, StoreError};
use crate::migrations;
use crate::repository::{lease_expiry, now_iso, CheckpointRepo, FileRepo, OutputRepo};
use crate::types::{
    CheckpointOutcome, EnqueueOutcome, FileRecord, FileSnapshot, NewFile, ReleaseOutcome,
    StageCheckpoint, StageOutput,
};

/// Error text stored on rows finalized by cancellation.
pub const CANCELLED_ERROR: &str = "cancelled";

/// Durable queue and checkpoint state for the pipeline.
pub struct PipelineStore {
    pool: ConnectionPool,
}

impl PipelineStore {
    /// Open (or create) the store at `path` and apply pending migrations.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        let path = path.to_string_lossy();
        let pool = connection::new_file(&path, config)?;
        let conn = pool.get()?;
        let applied = migrations::run_migrations(&conn)?;
        if applied > 0 {
            info!(applied, db_path = %path, "applied schema migrations");
        }
        Ok(Self { pool })
    }

    /// Open a private in-memory store. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        let conn = pool.get()?;
        let _ = migrations::run_migrations(&conn)?;
        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Start a write transaction.
    ///
    /// IMMEDIATE takes the write lock up front. Check-then-write sequences
    /// (dedupe, lease claims) stay atomic across worker threads instead of
    /// racing on a deferred lock upgrade.
    fn write_tx(conn: &mut PooledConnection) -> Result<rusqlite::Transaction<'_>> {
        Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queue operations
    // ─────────────────────────────────────────────────────────────────────

    /// Enqueue a file for processing.
    ///
    /// Unless `force` is set, a row with the same content hash that is
    /// queued, running, or finished usefully (`done`/`degraded`) is returned
    /// instead of creating a duplicate. `failed` rows never block a retry.
    pub fn enqueue(&self, file: &NewFile, force: bool) -> Result<EnqueueOutcome> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        if !force {
            if let Some(existing) = FileRepo::find_active_by_hash(&tx, &file.content_hash)? {
                tx.commit()?;
                debug!(file_id = %existing.id, file_name = %file.file_name, "duplicate content hash, reusing record");
                return Ok(EnqueueOutcome::Existing(existing));
            }
        }

        let record = FileRepo::insert(&tx, file)?;
        tx.commit()?;
        info!(file_id = %record.id, file_name = %file.file_name, size_bytes = file.size_bytes, "file queued");
        Ok(EnqueueOutcome::Created(record))
    }

    /// Lease the next workable file, if any.
    ///
    /// Picks the oldest `queued` row, or failing that the oldest `running`
    /// row whose lease has expired (its previous worker is presumed dead).
    /// The returned record is already marked `running` with a lease
    /// `lease_secs` from now.
    pub fn lease_next(&self, lease_secs: u64) -> Result<Option<FileRecord>> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let Some(id) = FileRepo::lease_candidate(&tx, &now_iso())? else {
            return Ok(None);
        };
        FileRepo::mark_running(&tx, &id, &lease_expiry(lease_secs))?;
        let record = Self::require_file(&tx, &id)?;
        tx.commit()?;
        debug!(file_id = %record.id, stage = %record.stage, "leased file");
        Ok(Some(record))
    }

    /// Return a leased file with a terminal outcome, or back to the queue.
    ///
    /// Already-terminal rows are returned unchanged, so a worker that lost a
    /// cancellation race can release without clobbering the final state.
    pub fn release(&self, file_id: &FileId, outcome: ReleaseOutcome) -> Result<FileRecord> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let record = Self::require_file(&tx, file_id.as_str())?;
        if record.status.is_terminal() {
            tx.commit()?;
            return Ok(record);
        }

        match &outcome {
            ReleaseOutcome::Done => {
                FileRepo::finalize(&tx, file_id.as_str(), FileStatus::Done, None)?;
            }
            ReleaseOutcome::Degraded { error } => {
                FileRepo::finalize(&tx, file_id.as_str(), FileStatus::Degraded, Some(error))?;
                CheckpointRepo::insert(
                    &tx,
                    file_id.as_str(),
                    record.stage,
                    CheckpointKind::Failed,
                    record.retry_count,
                    Some(error),
                )?;
            }
            ReleaseOutcome::Failed { error } => {
                FileRepo::finalize(&tx, file_id.as_str(), FileStatus::Failed, Some(error))?;
                CheckpointRepo::insert(
                    &tx,
                    file_id.as_str(),
                    record.stage,
                    CheckpointKind::Failed,
                    record.retry_count,
                    Some(error),
                )?;
            }
            ReleaseOutcome::Requeue => {
                FileRepo::requeue(&tx, file_id.as_str())?;
            }
        }

        let updated = Self::require_file(&tx, file_id.as_str())?;
        tx.commit()?;
        info!(file_id = %file_id, status = %updated.status, "released file");
        Ok(updated)
    }

    /// Cancel a queued or running file.
    ///
    /// A queued file has no owning worker, so it goes terminal `failed`
    /// right here. A running file only gets a flag; its worker observes
    /// the flag at the next checkpoint write and finalizes there, which
    /// keeps worker and canceller from fighting over the row. Returns
    /// `false` when the file is already terminal.
    pub fn cancel(&self, file_id: &FileId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let record = Self::require_file(&tx, file_id.as_str())?;
        match record.status {
            FileStatus::Queued => {
                Self::finalize_cancelled(&tx, &record, record.stage)?;
                tx.commit()?;
                Ok(true)
            }
            FileStatus::Running => {
                let flagged = FileRepo::request_cancel(&tx, file_id.as_str())?;
                tx.commit()?;
                if flagged {
                    info!(file_id = %file_id, "cancellation requested");
                }
                Ok(flagged)
            }
            _ => Ok(false),
        }
    }

    /// Requeue `running` rows whose lease is missing or expired.
    ///
    /// Called once at startup: workers from a previous process cannot hold
    /// valid leases anymore, and their files should not wait out the full
    /// lease before the expired-lease scan picks them up.
    pub fn recover_interrupted(&self) -> Result<u32> {
        let conn = self.conn()?;
        let changed = FileRepo::requeue_stale(&conn, &now_iso())?;
        let recovered = u32::try_from(changed).unwrap_or(u32::MAX);
        if recovered > 0 {
            info!(recovered, "requeued interrupted files");
        }
        Ok(recovered)
    }

    /// Requeue a `degraded` file at the analysis stage.
    ///
    /// Transcription and diarization outputs are kept; only the failed
    /// analysis is rerun.
    pub fn retry_analysis(&self, file_id: &FileId) -> Result<FileRecord> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let record = Self::require_file(&tx, file_id.as_str())?;
        if record.status != FileStatus::Degraded {
            return Err(StoreError::InvalidOperation(format!(
                "retry_analysis requires a degraded file, {} is {}",
                file_id,
                record.status
            )));
        }
        FileRepo::reopen_for_analysis(&tx, file_id.as_str())?;
        let updated = Self::require_file(&tx, file_id.as_str())?;
        tx.commit()?;
        info!(file_id = %file_id, "degraded file requeued for analysis");
        Ok(updated)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Checkpoints
    // ─────────────────────────────────────────────────────────────────────

    /// Record that `stage` started executing.
    ///
    /// Moves the stage pointer forward (resume restarts the recorded stage
    /// from its beginning), refreshes the lease, and appends a `started`
    /// checkpoint.
    pub fn checkpoint_started(
        &self,
        file_id: &FileId,
        stage: PipelineStage,
        lease_secs: u64,
    ) -> Result<CheckpointOutcome> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let record = Self::require_file(&tx, file_id.as_str())?;
        if record.cancel_requested {
            Self::finalize_cancelled(&tx, &record, stage)?;
            tx.commit()?;
            return Ok(CheckpointOutcome::Cancelled);
        }

        FileRepo::start_stage(&tx, file_id.as_str(), stage, &lease_expiry(lease_secs))?;
        CheckpointRepo::insert(
            &tx,
            file_id.as_str(),
            stage,
            CheckpointKind::Started,
            record.retry_count,
            None,
        )?;
        tx.commit()?;
        Ok(CheckpointOutcome::Proceed)
    }

    /// Record a retry attempt on the current stage.
    pub fn record_retry(
        &self,
        file_id: &FileId,
        stage: PipelineStage,
        retry_count: u32,
        error: &str,
        lease_secs: u64,
    ) -> Result<CheckpointOutcome> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let record = Self::require_file(&tx, file_id.as_str())?;
        if record.cancel_requested {
            Self::finalize_cancelled(&tx, &record, stage)?;
            tx.commit()?;
            return Ok(CheckpointOutcome::Cancelled);
        }

        FileRepo::record_retry(
            &tx,
            file_id.as_str(),
            retry_count,
            error,
            &lease_expiry(lease_secs),
        )?;
        CheckpointRepo::insert(
            &tx,
            file_id.as_str(),
            stage,
            CheckpointKind::Retry,
            retry_count,
            Some(error),
        )?;
        tx.commit()?;
        Ok(CheckpointOutcome::Proceed)
    }

    /// Persist a completed stage's output and advance the stage pointer.
    ///
    /// One transaction covers the output write, the pointer bump, the retry
    /// counter reset, and the `completed` checkpoint, so resume never finds
    /// an output without the matching stage or vice versa.
    pub fn advance_stage(
        &self,
        file_id: &FileId,
        output: &StageOutput,
        lease_secs: u64,
    ) -> Result<CheckpointOutcome> {
        let mut conn = self.conn()?;
        let tx = Self::write_tx(&mut conn)?;

        let stage = output.stage();
        let record = Self::require_file(&tx, file_id.as_str())?;
        if record.cancel_requested {
            Self::finalize_cancelled(&tx, &record, stage)?;
            tx.commit()?;
            return Ok(CheckpointOutcome::Cancelled);
        }

        // 1. Persist the output itself.
        match output {
            StageOutput::Validated {
                duration_secs,
                channels,
            } => {
                FileRepo::set_audio_properties(&tx, file_id.as_str(), *duration_secs, *channels)?;
            }
            StageOutput::Transcribed(transcription) => {
                OutputRepo::upsert_transcription(&tx, file_id.as_str(), transcription)?;
            }
            StageOutput::Diarized(diarization) => {
                OutputRepo::upsert_diarization(&tx, file_id.as_str(), diarization)?;
            }
            StageOutput::Analyzed(analysis) => {
                OutputRepo::upsert_analysis(&tx, file_id.as_str(), analysis)?;
            }
        }

        // 2. Move the stage pointer past the completed stage. The final
        //    stage has no successor; release() takes it terminal.
        let next = stage.next().unwrap_or(stage);
        FileRepo::advance(&tx, file_id.as_str(), next, &lease_expiry(lease_secs))?;

        // 3. Audit trail.
        CheckpointRepo::insert(
            &tx,
            file_id.as_str(),
            stage,
            CheckpointKind::Completed,
            record.retry_count,
            None,
        )?;
        tx.commit()?;
        debug!(file_id = %file_id, stage = %stage, "stage completed");
        Ok(CheckpointOutcome::Proceed)
    }

    /// Finalize a cancel-flagged file as `failed` inside the caller's tx.
    fn finalize_cancelled(
        tx: &Connection,
        record: &FileRecord,
        stage: PipelineStage,
    ) -> Result<()> {
        FileRepo::finalize(
            tx,
            record.id.as_str(),
            FileStatus::Failed,
            Some(CANCELLED_ERROR),
        )?;
        CheckpointRepo::insert(
            tx,
            record.id.as_str(),
            stage,
            CheckpointKind::Failed,
            record.retry_count,
            Some(CANCELLED_ERROR),
        )?;
        info!(file_id = %record.id, stage = %stage, "cancelled at checkpoint");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Get a file record, failing if absent.
    pub fn get_file(&self, file_id: &FileId) -> Result<FileRecord> {
        let conn = self.conn()?;
        Self::require_file(&conn, file_id.as_str())
    }

    /// Compact progress view of a file, for subscribers attaching mid-flight.
    pub fn current_state(&self, file_id: &FileId) -> Result<FileSnapshot> {
        let record = self.get_file(file_id)?;
        Ok(FileSnapshot {
            file_id: record.id.clone(),
            status: record.status,
            stage: record.stage,
            percent: record.percent(),
            retry_count: record.retry_count,
            last_error: record.last_error.clone(),
        })
    }

    /// Stored transcription output, if the stage has completed.
    pub fn get_transcription(
        &self,
        file_id: &FileId,
    ) -> Result<Option<calliq_core::TranscriptionResult>> {
        let conn = self.conn()?;
        OutputRepo::get_transcription(&conn, file_id.as_str())
    }

    /// Stored diarization output, if the stage has completed.
    pub fn get_diarization(
        &self,
        file_id: &FileId,
    ) -> Result<Option<calliq_core::DiarizationRecord>> {
        let conn = self.conn()?;
        OutputRepo::get_diarization(&conn, file_id.as_str())
    }

    /// Stored analysis output. Absent on `degraded` files.
    pub fn get_analysis(&self, file_id: &FileId) -> Result<Option<calliq_core::AnalysisRecord>> {
        let conn = self.conn()?;
        OutputRepo::get_analysis(&conn, file_id.as_str())
    }

    /// Checkpoint audit trail for a file, oldest first.
    pub fn checkpoints(&self, file_id: &FileId) -> Result<Vec<StageCheckpoint>> {
        let conn = self.conn()?;
        CheckpointRepo::list(&conn, file_id.as_str())
    }

    /// Number of files currently waiting in the queue.
    pub fn queue_depth(&self) -> Result<u64> {
        let conn = self.conn()?;
        let depth = FileRepo::queue_depth(&conn)?;
        Ok(u64::try_from(depth).unwrap_or(0))
    }

    fn require_file(conn: &Connection, file_id: &str) -> Result<FileRecord> {
        FileRepo::get(conn, file_id)?.ok_or_else(|| StoreError::FileNotFound(file_id.to_owned()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
