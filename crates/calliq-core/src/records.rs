//! Domain records produced by the pipeline stages.
//!
//! Each stage writes exactly one record for its file (transcription,
//! diarization, analysis); records are immutable once written. The types
//! here are the in-memory shapes; `calliq-store` owns their column mapping.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Transcription
// ─────────────────────────────────────────────────────────────────────────────

/// A single transcript word with its time span in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    /// The word text.
    pub word: String,
    /// Start offset in seconds from the beginning of the audio.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
}

impl WordTimestamp {
    /// Midpoint of the word's time span, used for segment assignment.
    #[must_use]
    pub fn midpoint(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

/// Output of the Transcribing stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcript text.
    pub full_text: String,
    /// Detected language tag (e.g. `"ru"`), if the capability reports one.
    pub language: Option<String>,
    /// Word-level timestamps in transcript order.
    pub words: Vec<WordTimestamp>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Diarization
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized speaker label.
///
/// Model output may carry arbitrary speaker ids; the strategy selector
/// relabels the first speaker to appear as `Operator` and merges the rest
/// into `Client` before anything downstream sees the segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The call-center operator whose speech is scored.
    Operator,
    /// The customer side (all non-operator speakers merged).
    Client,
}

impl Speaker {
    /// Lowercase label used in stored segments and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One speaker-attributed time segment with its merged transcript text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSegment {
    /// Who is speaking.
    pub speaker: Speaker,
    /// Segment start in seconds.
    pub start: f64,
    /// Segment end in seconds.
    pub end: f64,
    /// Transcript text assigned to this segment (empty until merge).
    #[serde(default)]
    pub text: String,
}

/// How the Diarizing stage separated speakers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiarizationMethod {
    /// Deterministic stereo split: left channel = operator, right = client.
    ChannelSplit,
    /// Probabilistic model-based separation of a mono signal.
    ModelBased,
}

impl DiarizationMethod {
    /// SQL string for the method CHECK constraint.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ChannelSplit => "channel_split",
            Self::ModelBased => "model_based",
        }
    }

    /// Parse the stored SQL string back into a method.
    #[must_use]
    pub fn from_sql(s: &str) -> Option<Self> {
        match s {
            "channel_split" => Some(Self::ChannelSplit),
            "model_based" => Some(Self::ModelBased),
            _ => None,
        }
    }
}

impl fmt::Display for DiarizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Output of the Diarizing stage, after normalization.
///
/// Invariants: `confidence` ∈ [0,100] (always 100 for channel split,
/// 0 for the failure fallback); `speaker_count` ≥ 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiarizationRecord {
    /// Separation method used.
    pub method: DiarizationMethod,
    /// Confidence 0–100 in the speaker assignment.
    pub confidence: f64,
    /// Number of distinct speakers the separation inferred.
    pub speaker_count: u32,
    /// Set when model confidence fell below the configured threshold.
    pub low_confidence: bool,
    /// Set when the model inferred more speakers than expected.
    pub multi_speaker: bool,
    /// Speaker segments in time order.
    pub segments: Vec<SpeakerSegment>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Analysis
// ─────────────────────────────────────────────────────────────────────────────

/// The three quality sub-scores, each already clamped to [0,100].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Adherence to the conversation standard.
    pub standard: u8,
    /// Customer-loyalty handling.
    pub loyalty: u8,
    /// Tone and kindness.
    pub kindness: u8,
}

impl ScoreBreakdown {
    /// Clamp raw capability scores into [0,100].
    ///
    /// Returns the breakdown plus whether any value needed clamping — a
    /// clamp is recorded on the analysis row but never fails the stage.
    #[must_use]
    pub fn from_raw(standard: i64, loyalty: i64, kindness: i64) -> (Self, bool) {
        let clamp = |v: i64| -> (u8, bool) {
            if v < 0 {
                (0, true)
            } else if v > 100 {
                (100, true)
            } else {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let v = v as u8;
                (v, false)
            }
        };
        let (standard, c1) = clamp(standard);
        let (loyalty, c2) = clamp(loyalty);
        let (kindness, c3) = clamp(kindness);
        (
            Self {
                standard,
                loyalty,
                kindness,
            },
            c1 || c2 || c3,
        )
    }

    /// Weighted overall score: `round(0.4·standard + 0.3·loyalty + 0.3·kindness)`.
    ///
    /// Always derived from the sub-scores, never taken from capability output.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn overall(&self) -> u8 {
        let weighted = 0.4 * f64::from(self.standard)
            + 0.3 * f64::from(self.loyalty)
            + 0.3 * f64::from(self.kindness);
        weighted.round() as u8
    }
}

/// Sentiment tag on a supporting quote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    /// The quote illustrates good handling.
    Positive,
    /// Neither good nor bad; the default when the capability omits it.
    #[default]
    Neutral,
    /// The quote illustrates a problem.
    Negative,
}

/// A verbatim quote backing one of the sub-scores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupportingQuote {
    /// Quoted operator text.
    pub text: String,
    /// Which criterion the quote supports (standard/loyalty/kindness).
    pub criterion: String,
    /// Sentiment of the quote.
    #[serde(default)]
    pub sentiment: Sentiment,
}

/// Output of the Analyzing stage. Absent on degraded files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Clamped sub-scores.
    #[serde(flatten)]
    pub scores: ScoreBreakdown,
    /// Derived overall score.
    pub overall: u8,
    /// Free-text summary of the call.
    pub summary: String,
    /// Supporting quotes tagged by criterion.
    pub quotes: Vec<SupportingQuote>,
    /// Whether any sub-score was clamped into range.
    pub clamped: bool,
}

impl AnalysisRecord {
    /// Build a record, deriving `overall` from the sub-scores.
    #[must_use]
    pub fn new(
        scores: ScoreBreakdown,
        summary: String,
        quotes: Vec<SupportingQuote>,
        clamped: bool,
    ) -> Self {
        Self {
            overall: scores.overall(),
            scores,
            summary,
            quotes,
            clamped,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
