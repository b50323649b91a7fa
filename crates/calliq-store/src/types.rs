//! Store-facing types: queue rows, stage outputs, operation outcomes.

use calliq_core::{
    AnalysisRecord, CheckpointKind, DiarizationRecord, FileId, FileStatus, PipelineStage,
    TranscriptionResult, TERMINAL_PERCENT,
};
use serde::{Deserialize, Serialize};

/// Parameters for enqueueing a new file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewFile {
    /// Original file name, kept for display and extension checks.
    pub file_name: String,
    /// Absolute path of the audio on disk; stages read the file from here.
    pub audio_path: String,
    /// SHA-256 of the file content, hex-encoded. Dedupe key.
    pub content_hash: String,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// One row of the `files` table.
///
/// Serializes with snake_case keys, matching the progress event wire shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Branded file id (`file-<uuidv7>`).
    pub id: FileId,
    /// Original file name.
    pub file_name: String,
    /// Path of the audio on disk.
    pub audio_path: String,
    /// SHA-256 content hash, hex-encoded.
    pub content_hash: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Audio duration in seconds, known after validation.
    pub duration_secs: Option<f64>,
    /// Channel count, known after validation.
    pub channels: Option<u16>,
    /// Stage currently executing or next to execute.
    pub stage: PipelineStage,
    /// Queue status.
    pub status: FileStatus,
    /// Retries consumed by the current stage.
    pub retry_count: u32,
    /// Most recent stage error, if any.
    pub last_error: Option<String>,
    /// Whether cancellation has been requested.
    pub cancel_requested: bool,
    /// Lease expiry timestamp while running.
    pub lease_expires_at: Option<String>,
    /// Row creation timestamp.
    pub created_at: String,
    /// Last modification timestamp.
    pub updated_at: String,
}

impl FileRecord {
    /// Overall progress 0–100 derived from status and stage.
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.status.is_terminal() {
            return TERMINAL_PERCENT;
        }
        match (self.status, self.stage) {
            (_, PipelineStage::Queued) => 0,
            (FileStatus::Running, stage) => stage.percent_started(),
            // Requeued mid-pipeline: report the last completed milestone.
            (_, stage) => stage.percent_started().saturating_sub(5),
        }
    }
}

/// Result of an enqueue attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum EnqueueOutcome {
    /// A new record was created and queued.
    Created(FileRecord),
    /// A record with the same content hash already covers this file.
    Existing(FileRecord),
}

impl EnqueueOutcome {
    /// Whether a new record was created.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// The record, whichever way the enqueue went.
    #[must_use]
    pub fn record(&self) -> &FileRecord {
        match self {
            Self::Created(record) | Self::Existing(record) => record,
        }
    }
}

/// How a worker returns its lease.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// All stages completed; analysis is present.
    Done,
    /// Analysis failed permanently; transcript and diarization remain usable.
    Degraded {
        /// The analysis failure that caused the degradation.
        error: String,
    },
    /// A fatal stage failure; the file is terminal.
    Failed {
        /// The failure description stored on the row.
        error: String,
    },
    /// Graceful shutdown mid-file: back to the queue, stage preserved.
    Requeue,
}

/// Whether the pipeline may continue after a checkpoint write.
///
/// Checkpoint writes are the only points where cancellation is observed;
/// a `Cancelled` return means the store already finalized the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// No cancellation pending; keep going.
    Proceed,
    /// Cancellation was observed; the file is now terminal `failed`.
    Cancelled,
}

/// Output persisted when a stage completes.
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutput {
    /// Validation accepted the file; header fields that probed are set.
    Validated {
        /// Audio duration in seconds, when the header carried one.
        duration_secs: Option<f64>,
        /// Channel count from the container header, when known.
        channels: Option<u16>,
    },
    /// Transcription output.
    Transcribed(TranscriptionResult),
    /// Diarization output (including the single-operator fallback).
    Diarized(DiarizationRecord),
    /// Quality analysis output.
    Analyzed(AnalysisRecord),
}

impl StageOutput {
    /// The stage this output belongs to.
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Validated { .. } => PipelineStage::Validating,
            Self::Transcribed(_) => PipelineStage::Transcribing,
            Self::Diarized(_) => PipelineStage::Diarizing,
            Self::Analyzed(_) => PipelineStage::Analyzing,
        }
    }
}

/// Compact progress view of a file, served to subscribers on attach.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSnapshot {
    /// File the snapshot describes.
    pub file_id: FileId,
    /// Queue status.
    pub status: FileStatus,
    /// Stage currently executing or next to execute.
    pub stage: PipelineStage,
    /// Overall progress 0–100.
    pub percent: u8,
    /// Retries consumed by the current stage.
    pub retry_count: u32,
    /// Most recent stage error, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One row of the `stage_checkpoints` audit log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageCheckpoint {
    /// Monotonic row id; per-file order follows insertion order.
    pub id: i64,
    /// File the checkpoint belongs to.
    pub file_id: FileId,
    /// Stage the checkpoint describes.
    pub stage: PipelineStage,
    /// What happened at this checkpoint.
    pub kind: CheckpointKind,
    /// Retry count at the time of writing.
    pub retry_count: u32,
    /// Failure description on retry/failed rows.
    pub error: Option<String>,
    /// When the checkpoint was written.
    pub created_at: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: FileStatus, stage: PipelineStage) -> FileRecord {
        FileRecord {
            id: FileId::new(),
            file_name: "call.mp3".into(),
            audio_path: "/tmp/audio/call.mp3".into(),
            content_hash: "abc".into(),
            size_bytes: 1024,
            duration_secs: None,
            channels: None,
            stage,
            status,
            retry_count: 0,
            last_error: None,
            cancel_requested: false,
            lease_expires_at: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn percent_for_fresh_file_is_zero() {
        assert_eq!(record(FileStatus::Queued, PipelineStage::Queued).percent(), 0);
    }

    #[test]
    fn percent_while_running_uses_stage_start() {
        assert_eq!(
            record(FileStatus::Running, PipelineStage::Transcribing).percent(),
            15
        );
        assert_eq!(
            record(FileStatus::Running, PipelineStage::Analyzing).percent(),
            75
        );
    }

    #[test]
    fn percent_for_requeued_file_reports_completed_milestone() {
        assert_eq!(
            record(FileStatus::Queued, PipelineStage::Diarizing).percent(),
            40
        );
    }

    #[test]
    fn percent_for_terminal_statuses_is_full() {
        for status in [FileStatus::Done, FileStatus::Degraded, FileStatus::Failed] {
            assert_eq!(record(status, PipelineStage::Analyzing).percent(), 100);
        }
    }

    #[test]
    fn stage_output_maps_to_its_stage() {
        let output = StageOutput::Validated {
            duration_secs: Some(12.5),
            channels: Some(2),
        };
        assert_eq!(output.stage(), PipelineStage::Validating);
    }

    #[test]
    fn enqueue_outcome_accessors() {
        let created = EnqueueOutcome::Created(record(FileStatus::Queued, PipelineStage::Queued));
        assert!(created.is_created());
        assert_eq!(created.record().status, FileStatus::Queued);

        let existing = EnqueueOutcome::Existing(record(FileStatus::Done, PipelineStage::Analyzing));
        assert!(!existing.is_created());
    }

    #[test]
    fn file_record_serializes_snake_case() {
        let json = serde_json::to_value(record(FileStatus::Running, PipelineStage::Validating))
            .unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["stage"], "validating");
        assert!(json.get("file_name").is_some());
        assert!(json.get("content_hash").is_some());
        assert!(json.get("retry_count").is_some());
    }
}
