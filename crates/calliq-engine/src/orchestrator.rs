//! Per-file pipeline execution.
//!
//! A worker that has leased a file hands it to [`process_file`], which walks
//! the stages from wherever the record left off: validate, transcribe,
//! diarize, analyze. Every transition goes through the store first and is
//! broadcast second, so subscribers can never observe a state the store does
//! not hold. Cancellation is only acted on at checkpoint writes; between
//! checkpoints a stage runs to completion even if the flag is already set.
//!
//! Failure routing is per stage: validation and transcription failures are
//! fatal, a dead diarizer degrades to a single-speaker guess and the
//! pipeline continues, and a dead analyzer leaves the file `degraded` with
//! its transcript intact.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use calliq_core::{
    AnalysisRecord, AnalysisRequest, AudioSource, CapabilityError, Diarizer, FileId, FileStatus,
    PipelineEvent, PipelineStage, QualityAnalyzer, StageError, Transcriber, TranscriptionResult,
};
use calliq_settings::CalliqSettings;
use calliq_store::{
    CheckpointOutcome, FileRecord, PipelineStore, ReleaseOutcome, StageOutput, StoreError,
    CANCELLED_ERROR,
};
use calliq_telemetry::PipelineMetrics;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::ProgressBroadcaster;
use crate::errors::{EngineError, Result};
use crate::{analysis, merge, selector, validate};

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

/// The three externally provided stage capabilities.
///
/// Adapters for real speech-to-text, speaker-separation and LLM backends
/// implement the `calliq-core` traits and get injected here; the engine
/// itself never knows which backend it is talking to.
#[derive(Clone)]
pub struct CapabilitySet {
    /// Speech-to-text with word timestamps.
    pub transcriber: Arc<dyn Transcriber>,
    /// Model-based speaker separation, used for non-stereo audio.
    pub diarizer: Arc<dyn Diarizer>,
    /// LLM-backed call-quality scoring.
    pub analyzer: Arc<dyn QualityAnalyzer>,
}

/// Everything a worker needs to run files, shared across all workers.
pub(crate) struct PipelineContext {
    pub(crate) store: Arc<PipelineStore>,
    pub(crate) broadcaster: Arc<ProgressBroadcaster>,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) settings: Arc<CalliqSettings>,
    pub(crate) metrics: Arc<PipelineMetrics>,
    /// Bounds concurrent transcription/diarization model runs.
    pub(crate) gpu_slots: Arc<Semaphore>,
}

impl PipelineContext {
    fn lease_secs(&self) -> u64 {
        self.settings.pipeline.lease_secs
    }

    /// Refresh the queued-file gauge from the store, best effort.
    pub(crate) fn refresh_queue_depth(&self) {
        match self.store.queue_depth() {
            Ok(depth) => self
                .metrics
                .set_queue_depth(i64::try_from(depth).unwrap_or(i64::MAX)),
            Err(err) => debug!(error = %err, "queue depth refresh failed"),
        }
    }
}

/// How a leased file left the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FileOutcome {
    /// Fully analyzed.
    Done,
    /// Analysis failed permanently; transcript and diarization stored.
    Degraded,
    /// Fatal stage failure.
    Failed,
    /// Cancellation observed at a checkpoint.
    Cancelled,
    /// Shutdown or an internal error; the file went back to the queue.
    Interrupted,
}

/// Why a stage stopped short of producing output.
enum StageAbort {
    /// The stage failed and retries (if any) are exhausted.
    Stage(StageError),
    /// A checkpoint write observed the cancel flag and finalized the file.
    Cancelled,
    /// Graceful shutdown interrupted the stage.
    Shutdown,
    /// The store or another engine internal failed.
    Internal(EngineError),
}

impl From<StoreError> for StageAbort {
    fn from(err: StoreError) -> Self {
        Self::Internal(EngineError::Store(err))
    }
}

impl From<EngineError> for StageAbort {
    fn from(err: EngineError) -> Self {
        Self::Internal(err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline driver
// ─────────────────────────────────────────────────────────────────────────────

/// Run a leased file through its remaining stages.
///
/// Never leaves the file leased: every exit path releases the row terminally
/// or back to the queue. Internal errors are logged here rather than bubbled,
/// so the worker loop stays a dispatcher.
pub(crate) async fn process_file(
    ctx: &PipelineContext,
    record: FileRecord,
    shutdown: &CancellationToken,
) -> FileOutcome {
    let file_id = record.id.clone();
    match drive(ctx, record, shutdown).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(file_id = %file_id, error = %err, "pipeline aborted on internal error");
            // Give the lease back; the stage pointer still marks where to
            // resume once whatever broke is fixed.
            if let Err(release_err) = ctx.store.release(&file_id, ReleaseOutcome::Requeue) {
                error!(file_id = %file_id, error = %release_err, "requeue after abort failed");
            }
            FileOutcome::Interrupted
        }
    }
}

async fn drive(
    ctx: &PipelineContext,
    mut record: FileRecord,
    shutdown: &CancellationToken,
) -> Result<FileOutcome> {
    let file_id = record.id.clone();
    // A freshly leased file carries the queued marker stage; work starts at
    // validation. A resumed file restarts its recorded stage from the top.
    let mut stage = match record.stage {
        PipelineStage::Queued => PipelineStage::Validating,
        other => other,
    };

    loop {
        if let CheckpointOutcome::Cancelled =
            ctx.store.checkpoint_started(&file_id, stage, ctx.lease_secs())?
        {
            return Ok(finish_cancelled(ctx, &file_id, stage).await);
        }
        ctx.broadcaster
            .publish(&PipelineEvent::stage_started(
                file_id.clone(),
                stage,
                record.retry_count,
            ))
            .await;

        let output = match run_stage(ctx, &record, stage, shutdown).await {
            Ok(output) => output,
            Err(StageAbort::Cancelled) => return Ok(finish_cancelled(ctx, &file_id, stage).await),
            Err(StageAbort::Shutdown) => return finish_interrupted(ctx, &file_id, stage).await,
            Err(StageAbort::Internal(err)) => return Err(err),
            Err(StageAbort::Stage(err)) => match stage {
                PipelineStage::Diarizing => {
                    warn!(
                        file_id = %file_id,
                        error = %err,
                        "diarization failed, continuing with single-speaker fallback"
                    );
                    let transcription = require_transcription(ctx, &file_id)?;
                    StageOutput::Diarized(selector::fallback_single_operator(
                        &transcription,
                        record.duration_secs,
                    ))
                }
                PipelineStage::Analyzing => return finish_degraded(ctx, &file_id, &err).await,
                _ => return finish_failed(ctx, &file_id, stage, &err).await,
            },
        };

        if let CheckpointOutcome::Cancelled =
            ctx.store.advance_stage(&file_id, &output, ctx.lease_secs())?
        {
            return Ok(finish_cancelled(ctx, &file_id, stage).await);
        }
        ctx.broadcaster
            .publish(&PipelineEvent::stage_completed(file_id.clone(), stage))
            .await;
        debug!(file_id = %file_id, stage = %stage, "stage output checkpointed");

        if stage == PipelineStage::Analyzing {
            return finish_done(ctx, &file_id).await;
        }

        // Re-read the row: the stage pointer moved, retries reset, and
        // validation may have filled in duration and channel count.
        record = ctx.store.get_file(&file_id)?;
        stage = record.stage;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Terminal transitions
// ─────────────────────────────────────────────────────────────────────────────

async fn finish_done(ctx: &PipelineContext, file_id: &FileId) -> Result<FileOutcome> {
    let updated = ctx.store.release(file_id, ReleaseOutcome::Done)?;
    ctx.broadcaster
        .publish(&PipelineEvent::completed(file_id.clone(), updated.status))
        .await;
    ctx.metrics.record_done();
    info!(file_id = %file_id, "analysis complete");
    Ok(FileOutcome::Done)
}

async fn finish_degraded(
    ctx: &PipelineContext,
    file_id: &FileId,
    error: &StageError,
) -> Result<FileOutcome> {
    let message = error.to_string();
    let updated = ctx.store.release(
        file_id,
        ReleaseOutcome::Degraded {
            error: message.clone(),
        },
    )?;
    ctx.broadcaster
        .publish(&PipelineEvent::failed(
            file_id.clone(),
            Some(PipelineStage::Analyzing),
            message.clone(),
        ))
        .await;
    ctx.broadcaster
        .publish(&PipelineEvent::completed(file_id.clone(), updated.status))
        .await;
    ctx.metrics.record_degraded();
    warn!(file_id = %file_id, error = %message, "analysis failed permanently, file degraded");
    Ok(FileOutcome::Degraded)
}

async fn finish_failed(
    ctx: &PipelineContext,
    file_id: &FileId,
    stage: PipelineStage,
    error: &StageError,
) -> Result<FileOutcome> {
    let message = error.to_string();
    let updated = ctx.store.release(
        file_id,
        ReleaseOutcome::Failed {
            error: message.clone(),
        },
    )?;
    ctx.broadcaster
        .publish(&PipelineEvent::failed(
            file_id.clone(),
            Some(stage),
            message.clone(),
        ))
        .await;
    ctx.broadcaster
        .publish(&PipelineEvent::completed(file_id.clone(), updated.status))
        .await;
    ctx.metrics.record_failed();
    warn!(file_id = %file_id, stage = %stage, error = %message, "file failed");
    Ok(FileOutcome::Failed)
}

async fn finish_interrupted(
    ctx: &PipelineContext,
    file_id: &FileId,
    stage: PipelineStage,
) -> Result<FileOutcome> {
    let _ = ctx.store.release(file_id, ReleaseOutcome::Requeue)?;
    info!(file_id = %file_id, stage = %stage, "shutdown mid-file, lease returned");
    Ok(FileOutcome::Interrupted)
}

/// Publish the cancellation events for a file the store already finalized.
async fn finish_cancelled(
    ctx: &PipelineContext,
    file_id: &FileId,
    stage: PipelineStage,
) -> FileOutcome {
    ctx.broadcaster
        .publish(&PipelineEvent::failed(
            file_id.clone(),
            Some(stage),
            CANCELLED_ERROR,
        ))
        .await;
    ctx.broadcaster
        .publish(&PipelineEvent::completed(file_id.clone(), FileStatus::Failed))
        .await;
    ctx.metrics.record_failed();
    info!(file_id = %file_id, stage = %stage, "cancelled at checkpoint");
    FileOutcome::Cancelled
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry loop
// ─────────────────────────────────────────────────────────────────────────────

/// Run one stage to success, retrying per policy.
///
/// The retry counter picks up from the leased record, so a file that
/// crashed mid-backoff does not get a fresh allowance. Backoff sleeps race
/// the shutdown token; cancellation is observed when the retry checkpoint
/// is written.
async fn run_stage(
    ctx: &PipelineContext,
    record: &FileRecord,
    stage: PipelineStage,
    shutdown: &CancellationToken,
) -> std::result::Result<StageOutput, StageAbort> {
    let file_id = &record.id;
    let policy = &ctx.settings.retry;
    let mut retry_count = record.retry_count;

    loop {
        if shutdown.is_cancelled() {
            return Err(StageAbort::Shutdown);
        }

        let error = match attempt_stage(ctx, record, stage, shutdown).await {
            Ok(output) => return Ok(output),
            Err(StageAbort::Stage(error)) => error,
            Err(abort) => return Err(abort),
        };

        if !error.is_retryable() || !policy.should_retry(retry_count) {
            return Err(StageAbort::Stage(error));
        }

        retry_count += 1;
        let message = error.to_string();
        if let CheckpointOutcome::Cancelled =
            ctx.store
                .record_retry(file_id, stage, retry_count, &message, ctx.lease_secs())?
        {
            return Err(StageAbort::Cancelled);
        }
        ctx.metrics.record_retry();
        ctx.broadcaster
            .publish(&PipelineEvent::retrying(
                file_id.clone(),
                stage,
                retry_count,
                message.clone(),
            ))
            .await;

        let delay = policy.delay_with_hint(retry_count, error.retry_after_ms());
        warn!(
            file_id = %file_id,
            stage = %stage,
            retry_count,
            delay = ?delay,
            error = %message,
            "stage failed, backing off"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shutdown.cancelled() => return Err(StageAbort::Shutdown),
        }
        ctx.broadcaster
            .publish(&PipelineEvent::stage_started(
                file_id.clone(),
                stage,
                retry_count,
            ))
            .await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stage bodies
// ─────────────────────────────────────────────────────────────────────────────

async fn attempt_stage(
    ctx: &PipelineContext,
    record: &FileRecord,
    stage: PipelineStage,
    shutdown: &CancellationToken,
) -> std::result::Result<StageOutput, StageAbort> {
    match stage {
        PipelineStage::Queued | PipelineStage::Validating => validate_stage(ctx, record).await,
        PipelineStage::Transcribing => transcribe_stage(ctx, record, shutdown).await,
        PipelineStage::Diarizing => diarize_stage(ctx, record, shutdown).await,
        PipelineStage::Analyzing => analyze_stage(ctx, record).await,
    }
}

/// Header checks run on the blocking pool; the limits struct is tiny and
/// moves into the closure.
async fn validate_stage(
    ctx: &PipelineContext,
    record: &FileRecord,
) -> std::result::Result<StageOutput, StageAbort> {
    let path = PathBuf::from(&record.audio_path);
    let file_name = record.file_name.clone();
    let limits = ctx.settings.limits.clone();
    let probe = tokio::task::spawn_blocking(move || validate::validate_audio(&path, &file_name, &limits))
        .await
        .map_err(|err| {
            StageAbort::Stage(StageError::Transient(format!("validation task failed: {err}")))
        })?
        .map_err(StageAbort::Stage)?;
    Ok(StageOutput::Validated {
        duration_secs: probe.duration_secs,
        channels: probe.channels,
    })
}

async fn transcribe_stage(
    ctx: &PipelineContext,
    record: &FileRecord,
    shutdown: &CancellationToken,
) -> std::result::Result<StageOutput, StageAbort> {
    let _permit = acquire_gpu(ctx, shutdown).await?;
    let source = audio_source(record);
    let transcription = with_timeout(
        ctx,
        "transcription",
        ctx.capabilities.transcriber.transcribe(&source),
    )
    .await?;
    debug!(
        file_id = %record.id,
        words = transcription.words.len(),
        "transcription finished"
    );
    Ok(StageOutput::Transcribed(transcription))
}

/// Stereo calls split on the channels themselves and never touch the model;
/// everything else goes through the diarizer capability. Either way the
/// word-level transcript is folded in before the output is checkpointed.
async fn diarize_stage(
    ctx: &PipelineContext,
    record: &FileRecord,
    shutdown: &CancellationToken,
) -> std::result::Result<StageOutput, StageAbort> {
    let transcription = require_transcription(ctx, &record.id)?;

    let diarization = if record.channels == Some(2) {
        debug!(file_id = %record.id, "stereo audio, splitting by channel");
        selector::split_stereo(record.duration_secs, &transcription)
    } else {
        let _permit = acquire_gpu(ctx, shutdown).await?;
        let source = audio_source(record);
        let raw = with_timeout(ctx, "diarization", ctx.capabilities.diarizer.diarize(&source))
            .await?;
        selector::from_model(raw, &ctx.settings.diarization)
    };

    Ok(StageOutput::Diarized(merge::merge_transcript(
        diarization,
        &transcription.words,
    )))
}

/// A malformed response earns exactly one immediate retry with the strict
/// prompt variant. The retry is checkpointed like any other, but it does not
/// consume the backoff budget. A second malformed response is final and
/// degrades the file.
async fn analyze_stage(
    ctx: &PipelineContext,
    record: &FileRecord,
) -> std::result::Result<StageOutput, StageAbort> {
    let diarization = require_diarization(ctx, &record.id)?;
    let mut request = analysis::build_request(&diarization, &ctx.settings.analysis);

    let analysis = match score_once(ctx, &request).await {
        Ok(analysis) => analysis,
        Err(StageAbort::Stage(error @ StageError::MalformedResponse(_))) => {
            // Counted retry, no backoff delay: the request itself changes.
            let retry_count = ctx.store.get_file(&record.id)?.retry_count + 1;
            let message = error.to_string();
            if let CheckpointOutcome::Cancelled = ctx.store.record_retry(
                &record.id,
                PipelineStage::Analyzing,
                retry_count,
                &message,
                ctx.lease_secs(),
            )? {
                return Err(StageAbort::Cancelled);
            }
            ctx.metrics.record_retry();
            ctx.broadcaster
                .publish(&PipelineEvent::retrying(
                    record.id.clone(),
                    PipelineStage::Analyzing,
                    retry_count,
                    message.clone(),
                ))
                .await;
            warn!(
                file_id = %record.id,
                retry_count,
                error = %message,
                "malformed analysis response, retrying once with the strict prompt"
            );
            request.strict = true;
            score_once(ctx, &request).await?
        }
        Err(abort) => return Err(abort),
    };
    Ok(StageOutput::Analyzed(analysis))
}

async fn score_once(
    ctx: &PipelineContext,
    request: &AnalysisRequest,
) -> std::result::Result<AnalysisRecord, StageAbort> {
    let payload = with_timeout(ctx, "analysis", ctx.capabilities.analyzer.analyze(request)).await?;
    analysis::parse_response(&payload).map_err(StageAbort::Stage)
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared stage plumbing
// ─────────────────────────────────────────────────────────────────────────────

/// Cap a capability call at the configured stage timeout.
///
/// A timeout is a transient failure; the stage re-runs under the normal
/// retry policy.
async fn with_timeout<T>(
    ctx: &PipelineContext,
    what: &str,
    fut: impl Future<Output = std::result::Result<T, CapabilityError>>,
) -> std::result::Result<T, StageAbort> {
    let limit = Duration::from_secs(ctx.settings.pipeline.stage_timeout_secs);
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(StageAbort::Stage(err.into())),
        Err(_) => Err(StageAbort::Stage(StageError::Transient(format!(
            "{what} timed out after {}s",
            limit.as_secs()
        )))),
    }
}

async fn acquire_gpu(
    ctx: &PipelineContext,
    shutdown: &CancellationToken,
) -> std::result::Result<OwnedSemaphorePermit, StageAbort> {
    tokio::select! {
        permit = ctx.gpu_slots.clone().acquire_owned() => {
            permit.map_err(|_| StageAbort::Shutdown)
        }
        () = shutdown.cancelled() => Err(StageAbort::Shutdown),
    }
}

fn require_transcription(ctx: &PipelineContext, file_id: &FileId) -> Result<TranscriptionResult> {
    ctx.store
        .get_transcription(file_id)?
        .ok_or_else(|| EngineError::MissingStageOutput {
            file_id: file_id.to_string(),
            stage: PipelineStage::Transcribing,
        })
}

fn require_diarization(
    ctx: &PipelineContext,
    file_id: &FileId,
) -> Result<calliq_core::DiarizationRecord> {
    ctx.store
        .get_diarization(file_id)?
        .ok_or_else(|| EngineError::MissingStageOutput {
            file_id: file_id.to_string(),
            stage: PipelineStage::Diarizing,
        })
}

fn audio_source(record: &FileRecord) -> AudioSource {
    AudioSource {
        path: PathBuf::from(&record.audio_path),
        channels: record.channels,
        duration_secs: record.duration_secs,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
