//! # calliq-core
//!
//! Foundation types for the calliq call-quality pipeline.
//!
//! This crate provides the shared vocabulary the other calliq crates depend on:
//!
//! - **IDs**: [`FileId`] as a prefixed, time-ordered newtype
//! - **Stages**: [`PipelineStage`] ordinals and [`FileStatus`] with progress milestones
//! - **Records**: transcription, diarization, and analysis payloads
//! - **Errors**: the [`StageError`] taxonomy that drives retry/degrade decisions
//! - **Retry**: [`RetryPolicy`] exponential backoff math
//! - **Events**: [`PipelineEvent`] progress/complete/error wire shapes
//! - **Capabilities**: the [`Transcriber`], [`Diarizer`], and [`QualityAnalyzer`]
//!   traits the pipeline consumes but never implements

#![deny(unsafe_code)]

pub mod capability;
pub mod error;
pub mod events;
pub mod ids;
pub mod records;
pub mod retry;
pub mod stage;

pub use capability::{
    AnalysisRequest, AudioSource, CapabilityError, CapabilityErrorKind, DiarizationOutput,
    DiarizedSegment, Diarizer, QualityAnalyzer, Transcriber,
};
pub use error::StageError;
pub use events::PipelineEvent;
pub use ids::FileId;
pub use records::{
    AnalysisRecord, DiarizationMethod, DiarizationRecord, ScoreBreakdown, Sentiment, Speaker,
    SpeakerSegment, SupportingQuote, TranscriptionResult, WordTimestamp,
};
pub use retry::RetryPolicy;
pub use stage::{CheckpointKind, FileStatus, PipelineStage, TERMINAL_PERCENT};
