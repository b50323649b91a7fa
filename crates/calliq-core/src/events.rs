//! Progress events published per file.
//!
//! Events are tagged with a `type` field and serialize with snake_case
//! keys so they can be forwarded to any transport as-is. Delivery is best
//! effort; the store remains the source of truth for current state.
//!
//! Stage-bearing events carry both the ordinal (`stage`) and the name
//! (`stage_name`), so consumers can sort without a lookup table and render
//! without one too.

use crate::ids::FileId;
use crate::stage::{FileStatus, PipelineStage, TERMINAL_PERCENT};
use serde::{Deserialize, Serialize};

/// One event in a file's progress stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A stage started or completed; `percent` is the milestone reached.
    #[serde(rename = "progress")]
    Progress {
        /// File the event belongs to.
        file_id: FileId,
        /// Stage ordinal 0–4.
        stage: i64,
        /// Stage the file is in.
        stage_name: PipelineStage,
        /// Overall progress 0–100.
        percent: u8,
        /// Retries consumed for the stage, when it is re-entering after one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
    },

    /// The file reached a terminal status. Always the last event published.
    #[serde(rename = "complete")]
    Complete {
        /// File the event belongs to.
        file_id: FileId,
        /// Terminal status: done, degraded or failed.
        status: FileStatus,
        /// Always 100.
        percent: u8,
    },

    /// A stage attempt failed. Recoverable errors precede a retry;
    /// unrecoverable ones precede the terminal `complete` event.
    #[serde(rename = "error")]
    Error {
        /// File the event belongs to.
        file_id: FileId,
        /// Ordinal of the stage that failed, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<i64>,
        /// Stage that failed, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage_name: Option<PipelineStage>,
        /// Failure description.
        #[serde(rename = "error")]
        message: String,
        /// Whether a retry of the stage is upcoming.
        recoverable: bool,
        /// Retries consumed for the stage so far, on recoverable errors.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<u32>,
    },
}

impl PipelineEvent {
    /// Progress event for a stage beginning execution.
    ///
    /// A nonzero `retry_count` marks a re-entry after backoff and is
    /// forwarded on the wire; a fresh start omits the field.
    #[must_use]
    pub fn stage_started(file_id: FileId, stage: PipelineStage, retry_count: u32) -> Self {
        Self::Progress {
            file_id,
            stage: stage.ordinal(),
            stage_name: stage,
            percent: stage.percent_started(),
            retry_count: (retry_count > 0).then_some(retry_count),
        }
    }

    /// Progress event for a stage that finished and checkpointed.
    #[must_use]
    pub fn stage_completed(file_id: FileId, stage: PipelineStage) -> Self {
        Self::Progress {
            file_id,
            stage: stage.ordinal(),
            stage_name: stage,
            percent: stage.percent_complete(),
            retry_count: None,
        }
    }

    /// Terminal event carrying the final status.
    #[must_use]
    pub fn completed(file_id: FileId, status: FileStatus) -> Self {
        Self::Complete {
            file_id,
            status,
            percent: TERMINAL_PERCENT,
        }
    }

    /// Recoverable failure notice published before a retry sleep.
    #[must_use]
    pub fn retrying(
        file_id: FileId,
        stage: PipelineStage,
        retry_count: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            file_id,
            stage: Some(stage.ordinal()),
            stage_name: Some(stage),
            message: message.into(),
            recoverable: true,
            retry_count: Some(retry_count),
        }
    }

    /// Unrecoverable failure notice published before the terminal event.
    #[must_use]
    pub fn failed(
        file_id: FileId,
        stage: Option<PipelineStage>,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            file_id,
            stage: stage.map(PipelineStage::ordinal),
            stage_name: stage,
            message: message.into(),
            recoverable: false,
            retry_count: None,
        }
    }

    /// The file this event belongs to.
    #[must_use]
    pub fn file_id(&self) -> &FileId {
        match self {
            Self::Progress { file_id, .. }
            | Self::Complete { file_id, .. }
            | Self::Error { file_id, .. } => file_id,
        }
    }

    /// Whether this is the last event a subscriber will see for the file.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
