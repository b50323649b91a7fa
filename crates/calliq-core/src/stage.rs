//! Pipeline stages, file statuses, and progress milestones.
//!
//! The stage machine is `Queued → Validating → Transcribing → Diarizing →
//! Analyzing`; the terminal outcomes (`done`, `degraded`, `failed`) are
//! statuses, not stage ordinals. A file's `stage` column only ever moves
//! forward; `retry_count` increments while the stage holds and resets to
//! zero on every advance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Percent reported once a file reaches a terminal status.
pub const TERMINAL_PERCENT: u8 = 100;

/// The five pipeline stages, stored as ordinals 0–4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Enqueued, no stage has run yet.
    Queued,
    /// Input checks: extension, magic signature, size, duration.
    Validating,
    /// Speech-to-text with word timestamps.
    Transcribing,
    /// Speaker separation (channel split or model based).
    Diarizing,
    /// Transcript merge + LLM quality scoring.
    Analyzing,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [Self; 5] = [
        Self::Queued,
        Self::Validating,
        Self::Transcribing,
        Self::Diarizing,
        Self::Analyzing,
    ];

    /// The ordinal stored in the `files.stage` column.
    #[must_use]
    pub fn ordinal(self) -> i64 {
        match self {
            Self::Queued => 0,
            Self::Validating => 1,
            Self::Transcribing => 2,
            Self::Diarizing => 3,
            Self::Analyzing => 4,
        }
    }

    /// Reconstruct a stage from its stored ordinal.
    #[must_use]
    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Queued),
            1 => Some(Self::Validating),
            2 => Some(Self::Transcribing),
            3 => Some(Self::Diarizing),
            4 => Some(Self::Analyzing),
            _ => None,
        }
    }

    /// Lowercase stage name used in events and logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Validating => "validating",
            Self::Transcribing => "transcribing",
            Self::Diarizing => "diarizing",
            Self::Analyzing => "analyzing",
        }
    }

    /// The stage that follows this one, or `None` after `Analyzing`.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::from_ordinal(self.ordinal() + 1)
    }

    /// Progress percent reported when this stage *completes*.
    ///
    /// Milestones weight the slow stages: transcription dominates wall time,
    /// diarization and analysis split most of the rest.
    #[must_use]
    pub fn percent_complete(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Validating => 10,
            Self::Transcribing => 40,
            Self::Diarizing => 70,
            Self::Analyzing => 90,
        }
    }

    /// Progress percent reported when this stage *starts*.
    ///
    /// Previous milestone plus a small bump, so observers can distinguish
    /// "started" from "previous stage done".
    #[must_use]
    pub fn percent_started(self) -> u8 {
        match self {
            Self::Queued => 0,
            other => {
                let prev = Self::from_ordinal(other.ordinal() - 1).map_or(0, Self::percent_complete);
                prev + 5
            }
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle status of a file, stored in the `files.status` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Waiting for a worker lease.
    Queued,
    /// Leased by a worker; `lease_expires_at` is set.
    Running,
    /// All stages completed, analysis present.
    Done,
    /// Completed without analysis (quality scoring unavailable).
    Degraded,
    /// Terminal failure; `last_error` explains why.
    Failed,
}

impl FileStatus {
    /// SQL string for the status CHECK constraint.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored SQL string back into a status.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status ends the file's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Degraded | Self::Failed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Kind of row appended to the `stage_checkpoints` audit log.
///
/// The audit log is observability-only: resumption is derived from
/// `files.stage`, never from these rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    /// A stage began executing.
    Started,
    /// A stage finished and its output was persisted.
    Completed,
    /// A stage attempt failed and a retry was scheduled.
    Retry,
    /// A stage failed terminally (for this file or this stage).
    Failed,
}

impl CheckpointKind {
    /// SQL string for the kind CHECK constraint.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Retry => "retry",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored SQL string back into a kind.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "started" => Some(Self::Started),
            "completed" => Some(Self::Completed),
            "retry" => Some(Self::Retry),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
