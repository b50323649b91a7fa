//! Error types for the engine crate.
//!
//! Stage-level failures are [`calliq_core::StageError`] and stay inside the
//! orchestrator, which turns them into terminal statuses or retries.
//! [`EngineError`] is what escapes to callers: infrastructure problems the
//! pipeline cannot route around.

use calliq_core::PipelineStage;
use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The checkpoint store failed.
    #[error(transparent)]
    Store(#[from] calliq_store::StoreError),

    /// Filesystem access failed while preparing a file for the queue.
    #[error("io failure on {path}: {source}")]
    Io {
        /// Path that was being read.
        path: String,
        /// Underlying io error.
        #[source]
        source: std::io::Error,
    },

    /// The enqueue path does not point at a usable file.
    #[error("invalid audio path: {0}")]
    InvalidPath(String),

    /// A resumed file is missing the checkpointed output its stage depends on.
    ///
    /// Stage advancement and output writes share a transaction, so this
    /// indicates external tampering with the database, not a crash artifact.
    #[error("{file_id} resumed without a stored {stage} output")]
    MissingStageOutput {
        /// File being resumed.
        file_id: String,
        /// Stage whose output should exist.
        stage: PipelineStage,
    },
}

/// Convenience type alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_passes_through() {
        let err = EngineError::from(calliq_store::StoreError::FileNotFound("file-1".into()));
        assert_eq!(err.to_string(), "file not found: file-1");
    }

    #[test]
    fn io_error_names_the_path() {
        let err = EngineError::Io {
            path: "/tmp/call.mp3".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/tmp/call.mp3"));
    }

    #[test]
    fn missing_output_names_stage() {
        let err = EngineError::MissingStageOutput {
            file_id: "file-9".into(),
            stage: PipelineStage::Transcribing,
        };
        assert_eq!(
            err.to_string(),
            "file-9 resumed without a stored transcribing output"
        );
    }
}
