//! Trait seam between the pipeline and its external stage capabilities.
//!
//! The engine only ever sees these traits; real transcription, speaker
//! separation and LLM scoring live behind adapters in downstream crates,
//! and tests substitute doubles. Every failure crosses the seam as a
//! [`CapabilityError`] so classification happens in exactly one place.

use crate::error::StageError;
use crate::records::TranscriptionResult;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Inputs and raw outputs
// ─────────────────────────────────────────────────────────────────────────────

/// Validated audio handed to the transcription and diarization capabilities.
///
/// `channels` and `duration_secs` come from the container header when the
/// validator could read them; compressed formats without a parseable header
/// leave them `None` and adapters probe the file themselves.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSource {
    /// Location of the audio file on disk.
    pub path: PathBuf,
    /// Channel count from the container header, when known.
    pub channels: Option<u16>,
    /// Duration in seconds from the container header, when known.
    pub duration_secs: Option<f64>,
}

/// Raw model segment before speaker normalization.
///
/// `speaker` is whatever label the model emits (`"SPEAKER_00"` etc.);
/// the strategy selector maps labels onto operator/client.
#[derive(Clone, Debug, PartialEq)]
pub struct DiarizedSegment {
    /// Model-assigned speaker label.
    pub speaker: String,
    /// Segment start in seconds.
    pub start: f64,
    /// Segment end in seconds.
    pub end: f64,
}

/// Raw output of a model-based diarization run.
#[derive(Clone, Debug, PartialEq)]
pub struct DiarizationOutput {
    /// Segments in time order, labels unnormalized.
    pub segments: Vec<DiarizedSegment>,
    /// Model confidence 0–100.
    pub confidence: f64,
    /// Distinct speakers the model inferred.
    pub speaker_count: u32,
}

/// Input to the quality analyzer.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisRequest {
    /// Operator-attributed transcript text, the only text that is scored.
    pub operator_text: String,
    /// Length-capped client-side context, never scored directly.
    pub client_context: String,
    /// Set on the single retry after a malformed response; adapters should
    /// switch to their most schema-insistent prompt variant.
    pub strict: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure category reported by a capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// The input itself is unusable; retrying cannot help.
    InvalidInput,
    /// Temporary failure worth retrying.
    Transient,
    /// The backing resource is saturated (rate limit, busy GPU).
    Unavailable,
    /// The capability produced output that failed validation.
    Malformed,
}

/// Classified capability failure; maps 1:1 onto [`StageError`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CapabilityError {
    /// Failure category.
    pub kind: CapabilityErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Wait hint from the resource, on `Unavailable` failures.
    pub retry_after_ms: Option<u64>,
}

impl CapabilityError {
    /// Unusable input; the file will fail validation-style.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::InvalidInput,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Temporary failure eligible for backoff and retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Transient,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Saturated resource, optionally with a server wait hint.
    pub fn unavailable(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self {
            kind: CapabilityErrorKind::Unavailable,
            message: message.into(),
            retry_after_ms,
        }
    }

    /// Schema-invalid output.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Malformed,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Classify an unstructured failure message by its wording.
    ///
    /// For capabilities wrapping clients that only surface error strings.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        match StageError::classify(&message) {
            StageError::Validation(_) => Self::invalid_input(message),
            StageError::ResourceUnavailable { retry_after_ms, .. } => Self {
                kind: CapabilityErrorKind::Unavailable,
                message,
                retry_after_ms,
            },
            _ => Self::transient(message),
        }
    }
}

impl From<CapabilityError> for StageError {
    fn from(err: CapabilityError) -> Self {
        match err.kind {
            CapabilityErrorKind::InvalidInput => Self::Validation(err.message),
            CapabilityErrorKind::Transient => Self::Transient(err.message),
            CapabilityErrorKind::Unavailable => Self::ResourceUnavailable {
                message: err.message,
                retry_after_ms: err.retry_after_ms,
            },
            CapabilityErrorKind::Malformed => Self::MalformedResponse(err.message),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability traits
// ─────────────────────────────────────────────────────────────────────────────

/// Speech-to-text with word timestamps.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the full audio file.
    async fn transcribe(&self, source: &AudioSource)
        -> Result<TranscriptionResult, CapabilityError>;
}

/// Model-based speaker separation for mono audio.
#[async_trait]
pub trait Diarizer: Send + Sync {
    /// Separate speakers across the full audio file.
    async fn diarize(&self, source: &AudioSource) -> Result<DiarizationOutput, CapabilityError>;
}

/// LLM-backed call-quality scoring.
///
/// Returns the parsed JSON payload; schema validation and score clamping
/// happen engine-side so every adapter is held to the same contract.
#[async_trait]
pub trait QualityAnalyzer: Send + Sync {
    /// Score the operator's side of the call.
    async fn analyze(&self, request: &AnalysisRequest)
        -> Result<serde_json::Value, CapabilityError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
