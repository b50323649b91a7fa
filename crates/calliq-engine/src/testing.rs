//! Shared test doubles and fixtures.
//!
//! Capability mocks play a scripted sequence of outcomes and then repeat a
//! fallback, so a test can express "fail twice, then succeed" in one line.
//! Call counts and captured requests let tests assert which capabilities
//! actually ran.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use calliq_core::{
    AnalysisRequest, AudioSource, CapabilityError, DiarizationOutput, Diarizer, PipelineEvent,
    QualityAnalyzer, Transcriber, TranscriptionResult, WordTimestamp,
};
use calliq_settings::{CalliqSettings, PipelineSettings};
use calliq_store::{FileRecord, NewFile, PipelineStore};
use calliq_telemetry::PipelineMetrics;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::broadcast::{ProgressBroadcaster, ProgressReceiver};
use crate::orchestrator::{CapabilitySet, PipelineContext};

// ─────────────────────────────────────────────────────────────────────────────
// Scripted capabilities
// ─────────────────────────────────────────────────────────────────────────────

struct Script<T> {
    queued: Mutex<VecDeque<Result<T, CapabilityError>>>,
    fallback: Result<T, CapabilityError>,
}

impl<T: Clone> Script<T> {
    fn new(queued: Vec<Result<T, CapabilityError>>, fallback: Result<T, CapabilityError>) -> Self {
        Self {
            queued: Mutex::new(queued.into()),
            fallback,
        }
    }

    fn always(fallback: Result<T, CapabilityError>) -> Self {
        Self::new(Vec::new(), fallback)
    }

    fn next(&self) -> Result<T, CapabilityError> {
        self.queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Transcriber double with a scripted outcome sequence.
pub(crate) struct ScriptedTranscriber {
    script: Script<TranscriptionResult>,
    calls: AtomicU32,
}

impl ScriptedTranscriber {
    pub(crate) fn ok(result: TranscriptionResult) -> Self {
        Self {
            script: Script::always(Ok(result)),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn fail(error: CapabilityError) -> Self {
        Self {
            script: Script::always(Err(error)),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn fail_then_ok(errors: Vec<CapabilityError>, result: TranscriptionResult) -> Self {
        Self {
            script: Script::new(errors.into_iter().map(Err).collect(), Ok(result)),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(
        &self,
        _source: &AudioSource,
    ) -> Result<TranscriptionResult, CapabilityError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.next()
    }
}

/// Diarizer double with a scripted outcome sequence.
pub(crate) struct ScriptedDiarizer {
    script: Script<DiarizationOutput>,
    calls: AtomicU32,
}

impl ScriptedDiarizer {
    pub(crate) fn ok(output: DiarizationOutput) -> Self {
        Self {
            script: Script::always(Ok(output)),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn fail(error: CapabilityError) -> Self {
        Self {
            script: Script::always(Err(error)),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Diarizer for ScriptedDiarizer {
    async fn diarize(&self, _source: &AudioSource) -> Result<DiarizationOutput, CapabilityError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.next()
    }
}

/// Analyzer double that also captures every request it receives.
pub(crate) struct ScriptedAnalyzer {
    script: Script<Value>,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedAnalyzer {
    pub(crate) fn ok(payload: Value) -> Self {
        Self {
            script: Script::always(Ok(payload)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail(error: CapabilityError) -> Self {
        Self {
            script: Script::always(Err(error)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fail_then_ok(errors: Vec<CapabilityError>, payload: Value) -> Self {
        Self {
            script: Script::new(errors.into_iter().map(Err).collect(), Ok(payload)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return the given payloads in order; further calls fail the test
    /// visibly instead of looping.
    pub(crate) fn payloads(payloads: Vec<Value>) -> Self {
        Self {
            script: Script::new(
                payloads.into_iter().map(Ok).collect(),
                Err(CapabilityError::transient("analyzer script exhausted")),
            ),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl QualityAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Value, CapabilityError> {
        self.requests.lock().push(request.clone());
        self.script.next()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// Transcript fixture from `(word, start, end)` triples.
pub(crate) fn transcription_of(words: &[(&str, f64, f64)]) -> TranscriptionResult {
    TranscriptionResult {
        full_text: words
            .iter()
            .map(|(word, _, _)| *word)
            .collect::<Vec<_>>()
            .join(" "),
        language: Some("en".into()),
        words: words
            .iter()
            .map(|(word, start, end)| WordTimestamp {
                word: (*word).to_owned(),
                start: *start,
                end: *end,
            })
            .collect(),
    }
}

/// Well-formed analyzer payload with the given criterion scores.
pub(crate) fn analysis_payload(standard: i64, loyalty: i64, kindness: i64) -> Value {
    serde_json::json!({
        "standard": standard,
        "loyalty": loyalty,
        "kindness": kindness,
        "summary": "Polite, accurate and efficient handling.",
        "quotes": [
            {
                "text": "happy to help with that",
                "criterion": "kindness",
                "sentiment": "positive"
            }
        ]
    })
}

/// Write a 4-second silent PCM WAV, 8 kHz, 16-bit.
pub(crate) fn write_wav(path: &Path, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..(8000 * 4 * u32::from(channels)) {
        writer.write_sample(0_i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Write a WAV named `name` under `dir` and enqueue it.
pub(crate) fn enqueue_wav(
    store: &PipelineStore,
    dir: &Path,
    name: &str,
    channels: u16,
) -> FileRecord {
    let path = dir.join(name);
    write_wav(&path, channels);
    let size_bytes = std::fs::metadata(&path).unwrap().len();
    let outcome = store
        .enqueue(
            &NewFile {
                file_name: name.to_owned(),
                audio_path: path.to_string_lossy().into_owned(),
                content_hash: format!("hash-{name}"),
                size_bytes,
            },
            false,
        )
        .unwrap();
    assert!(outcome.is_created());
    outcome.record().clone()
}

/// [`enqueue_wav`], then lease the file back for direct pipeline runs.
pub(crate) fn enqueue_and_lease(
    store: &PipelineStore,
    dir: &Path,
    name: &str,
    channels: u16,
) -> FileRecord {
    let _ = enqueue_wav(store, dir, name, channels);
    store.lease_next(60).unwrap().expect("a queued file to lease")
}

// ─────────────────────────────────────────────────────────────────────────────
// Context assembly
// ─────────────────────────────────────────────────────────────────────────────

/// Pipeline context over a fresh in-memory store.
pub(crate) fn test_context(
    transcriber: Arc<ScriptedTranscriber>,
    diarizer: Arc<ScriptedDiarizer>,
    analyzer: Arc<ScriptedAnalyzer>,
) -> (PipelineContext, Arc<PipelineMetrics>) {
    let store = Arc::new(PipelineStore::open_in_memory().unwrap());
    context_with_store(store, transcriber, diarizer, analyzer)
}

/// Pipeline context over an existing store, for multi-run tests.
pub(crate) fn context_with_store(
    store: Arc<PipelineStore>,
    transcriber: Arc<ScriptedTranscriber>,
    diarizer: Arc<ScriptedDiarizer>,
    analyzer: Arc<ScriptedAnalyzer>,
) -> (PipelineContext, Arc<PipelineMetrics>) {
    let settings = CalliqSettings {
        pipeline: PipelineSettings {
            poll_interval_ms: 20,
            ..PipelineSettings::default()
        },
        ..CalliqSettings::default()
    };
    let metrics = Arc::new(PipelineMetrics::new());
    let gpu_slots = Arc::new(Semaphore::new(settings.pipeline.gpu_slots));
    let ctx = PipelineContext {
        store,
        broadcaster: Arc::new(ProgressBroadcaster::new(metrics.clone())),
        capabilities: CapabilitySet {
            transcriber,
            diarizer,
            analyzer,
        },
        settings: Arc::new(settings),
        metrics: metrics.clone(),
        gpu_slots,
    };
    (ctx, metrics)
}

/// Collect a terminated event stream into a vec.
pub(crate) async fn drain(rx: &mut ProgressReceiver) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
