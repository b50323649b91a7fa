//! Transcript and diarization merge.
//!
//! Each transcript word is assigned to a speaker by its midpoint: the first
//! segment in record order whose half-open `[start, end)` span contains the
//! midpoint wins, and a word outside every segment goes to the segment
//! nearest in time. Consecutive words with the same speaker then fold into
//! one texted segment spanning the first word's start to the last word's
//! end. The resulting segments replace the untexted ones on the record.

use calliq_core::{DiarizationRecord, Speaker, SpeakerSegment, WordTimestamp};

/// Attach transcript words to the record's speakers.
///
/// Metadata (method, confidence, flags) carries over unchanged; only the
/// segments are rebuilt from the word runs. With no words at all the
/// record keeps empty segments.
pub(crate) fn merge_transcript(
    base: DiarizationRecord,
    words: &[WordTimestamp],
) -> DiarizationRecord {
    let speakers = assign_speakers(&base.segments, words);
    let segments = fold_runs(words, &speakers);
    DiarizationRecord { segments, ..base }
}

/// Speaker for each word, parallel to `words`.
///
/// With no segments to match against every word defaults to the operator,
/// mirroring the single-speaker fallback.
fn assign_speakers(segments: &[SpeakerSegment], words: &[WordTimestamp]) -> Vec<Speaker> {
    words
        .iter()
        .map(|word| {
            let mid = word.midpoint();
            if let Some(segment) = segments.iter().find(|s| s.start <= mid && mid < s.end) {
                return segment.speaker;
            }
            segments
                .iter()
                .min_by(|a, b| edge_distance(a, mid).total_cmp(&edge_distance(b, mid)))
                .map_or(Speaker::Operator, |s| s.speaker)
        })
        .collect()
}

/// Distance from a time point to a segment's nearest edge; zero inside.
fn edge_distance(segment: &SpeakerSegment, point: f64) -> f64 {
    if point < segment.start {
        segment.start - point
    } else if point >= segment.end {
        point - segment.end
    } else {
        0.0
    }
}

/// Fold same-speaker word runs into texted segments.
fn fold_runs(words: &[WordTimestamp], speakers: &[Speaker]) -> Vec<SpeakerSegment> {
    let mut segments: Vec<SpeakerSegment> = Vec::new();
    for (word, speaker) in words.iter().zip(speakers) {
        match segments.last_mut() {
            Some(last) if last.speaker == *speaker => {
                last.end = word.end;
                last.text.push(' ');
                last.text.push_str(&word.word);
            }
            _ => segments.push(SpeakerSegment {
                speaker: *speaker,
                start: word.start,
                end: word.end,
                text: word.word.clone(),
            }),
        }
    }
    segments
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
