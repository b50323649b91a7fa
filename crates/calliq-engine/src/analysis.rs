//! Quality-analysis request building and response validation.
//!
//! Only operator-attributed text is scored. Client text rides along as a
//! length-capped context block so the analyzer can judge responses in
//! context without scoring the customer. The analyzer's JSON is validated
//! here rather than in adapters: required scores present and numeric,
//! sub-scores clamped into [0,100], quotes without text or criterion
//! dropped, and the overall score always recomputed from the weighted
//! sub-scores no matter what the payload claims.

use calliq_core::{
    AnalysisRecord, AnalysisRequest, DiarizationRecord, ScoreBreakdown, Sentiment, Speaker,
    StageError, SupportingQuote,
};
use calliq_settings::AnalysisSettings;
use serde_json::Value;

/// Build the analyzer request from merged diarization segments.
pub(crate) fn build_request(
    diarization: &DiarizationRecord,
    settings: &AnalysisSettings,
) -> AnalysisRequest {
    let operator_text = speaker_text(diarization, Speaker::Operator);
    let client_context = truncate_chars(
        speaker_text(diarization, Speaker::Client),
        settings.client_context_max_chars,
    );
    AnalysisRequest {
        operator_text,
        client_context,
        strict: false,
    }
}

/// Validate the analyzer's JSON payload into an [`AnalysisRecord`].
///
/// Accepts either a JSON object or a string holding one, with optional
/// markdown code fences around it. Anything that fails the schema is a
/// [`StageError::MalformedResponse`], which earns a single strict retry.
pub(crate) fn parse_response(value: &Value) -> Result<AnalysisRecord, StageError> {
    let parsed;
    let object = match value {
        Value::Object(map) => map,
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(strip_code_fences(text))
                .map_err(|e| malformed(format!("payload is not valid json: {e}")))?;
            match &parsed {
                Value::Object(map) => map,
                other => {
                    return Err(malformed(format!(
                        "payload is {} where an object was expected",
                        type_name(other)
                    )))
                }
            }
        }
        other => {
            return Err(malformed(format!(
                "payload is {} where an object was expected",
                type_name(other)
            )))
        }
    };

    let standard = require_score(object, "standard")?;
    let loyalty = require_score(object, "loyalty")?;
    let kindness = require_score(object, "kindness")?;
    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing or non-string 'summary'"))?
        .trim()
        .to_owned();

    let (scores, clamped) = ScoreBreakdown::from_raw(standard, loyalty, kindness);
    let quotes = parse_quotes(object.get("quotes"));
    // `overall` in the payload is ignored; the record derives its own.
    Ok(AnalysisRecord::new(scores, summary, quotes, clamped))
}

/// Concatenated text of one speaker's segments, in time order.
fn speaker_text(diarization: &DiarizationRecord, speaker: Speaker) -> String {
    diarization
        .segments
        .iter()
        .filter(|s| s.speaker == speaker && !s.text.is_empty())
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max` characters on a character boundary.
fn truncate_chars(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    text.chars().take(max).collect()
}

/// Strip a surrounding markdown code fence, with or without a language tag.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn require_score(object: &serde_json::Map<String, Value>, key: &str) -> Result<i64, StageError> {
    let value = object
        .get(key)
        .ok_or_else(|| malformed(format!("missing score '{key}'")))?;
    #[allow(clippy::cast_possible_truncation)]
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
        .ok_or_else(|| malformed(format!("non-numeric score '{key}'")))
}

fn parse_quotes(value: Option<&Value>) -> Vec<SupportingQuote> {
    value
        .and_then(Value::as_array)
        .map(|quotes| quotes.iter().filter_map(parse_quote).collect())
        .unwrap_or_default()
}

/// One quote, or `None` when text or criterion is missing or empty.
fn parse_quote(value: &Value) -> Option<SupportingQuote> {
    let text = value.get("text")?.as_str()?.trim();
    let criterion = value.get("criterion")?.as_str()?.trim();
    if text.is_empty() || criterion.is_empty() {
        return None;
    }
    let sentiment = value
        .get("sentiment")
        .and_then(Value::as_str)
        .map_or(Sentiment::Neutral, |s| match s {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        });
    Some(SupportingQuote {
        text: text.to_owned(),
        criterion: criterion.to_owned(),
        sentiment,
    })
}

fn malformed(message: impl Into<String>) -> StageError {
    StageError::MalformedResponse(message.into())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
