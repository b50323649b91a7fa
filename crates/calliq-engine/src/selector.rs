//! Diarization strategy selection and speaker normalization.
//!
//! Two-channel audio gets a deterministic channel split: the left channel is
//! the operator, the right is the client, full confidence, no model call.
//! Everything else goes through the model capability, whose arbitrary
//! speaker labels are normalized here: the first speaker to appear becomes
//! the operator and all remaining labels merge into the client. When the
//! model fails outright the pipeline degrades to a single operator segment
//! covering the whole call rather than losing the file.
//!
//! Segments produced here carry no text yet; `merge` assigns transcript
//! words afterwards.

use calliq_core::{
    DiarizationMethod, DiarizationOutput, DiarizationRecord, Speaker, SpeakerSegment,
    TranscriptionResult,
};
use calliq_settings::DiarizationSettings;
use tracing::warn;

/// Build the channel-split record for two-channel audio.
///
/// Both speakers span the full call; word assignment resolves the overlap
/// deterministically in the operator's favor.
pub(crate) fn split_stereo(
    duration_secs: Option<f64>,
    transcription: &TranscriptionResult,
) -> DiarizationRecord {
    let end = duration_secs.unwrap_or_else(|| transcript_end(transcription));
    let span = |speaker| SpeakerSegment {
        speaker,
        start: 0.0,
        end,
        text: String::new(),
    };
    DiarizationRecord {
        method: DiarizationMethod::ChannelSplit,
        confidence: 100.0,
        speaker_count: 2,
        low_confidence: false,
        multi_speaker: false,
        segments: vec![span(Speaker::Operator), span(Speaker::Client)],
    }
}

/// Normalize raw model output into operator/client segments.
///
/// The operator is the first speaker in time order. Confidence below the
/// configured threshold and speaker counts above the expected maximum are
/// flagged on the record but never fail the stage.
pub(crate) fn from_model(
    raw: DiarizationOutput,
    settings: &DiarizationSettings,
) -> DiarizationRecord {
    let operator_label = raw
        .segments
        .iter()
        .min_by(|a, b| a.start.total_cmp(&b.start))
        .map(|s| s.speaker.clone());

    let segments = raw
        .segments
        .into_iter()
        .map(|s| SpeakerSegment {
            speaker: if Some(&s.speaker) == operator_label.as_ref() {
                Speaker::Operator
            } else {
                Speaker::Client
            },
            start: s.start,
            end: s.end,
            text: String::new(),
        })
        .collect();

    let confidence = raw.confidence.clamp(0.0, 100.0);
    let low_confidence = confidence < settings.low_confidence_threshold;
    let multi_speaker = raw.speaker_count > settings.max_expected_speakers;
    if low_confidence {
        warn!(confidence, "diarization confidence below threshold");
    }
    if multi_speaker {
        warn!(
            speaker_count = raw.speaker_count,
            "more speakers than expected, merging extras into client"
        );
    }

    DiarizationRecord {
        method: DiarizationMethod::ModelBased,
        confidence,
        speaker_count: raw.speaker_count.max(1),
        low_confidence,
        multi_speaker,
        segments,
    }
}

/// Degraded result when the diarizer fails: the whole call as one operator
/// segment with zero confidence, so analysis still has text to score.
pub(crate) fn fallback_single_operator(
    transcription: &TranscriptionResult,
    duration_secs: Option<f64>,
) -> DiarizationRecord {
    let end = duration_secs.unwrap_or_else(|| transcript_end(transcription));
    DiarizationRecord {
        method: DiarizationMethod::ModelBased,
        confidence: 0.0,
        speaker_count: 1,
        low_confidence: true,
        multi_speaker: false,
        segments: vec![SpeakerSegment {
            speaker: Speaker::Operator,
            start: 0.0,
            end,
            text: transcription.full_text.clone(),
        }],
    }
}

/// End of the last transcript word, for when the header had no duration.
fn transcript_end(transcription: &TranscriptionResult) -> f64 {
    transcription
        .words
        .last()
        .map_or(0.0, |word| word.end)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
