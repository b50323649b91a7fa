//! Stage failure taxonomy.
//!
//! Every stage failure is folded into [`StageError`] before the orchestrator
//! sees it; the variant alone decides retry eligibility and the terminal
//! status a file lands in when retries run out.

use thiserror::Error;

/// Classified failure of a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The input file is unusable. Never retried; the file fails immediately.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A failure that may succeed on retry (timeouts, dropped connections).
    #[error("transient failure: {0}")]
    Transient(String),

    /// An upstream resource is saturated (rate limits, busy GPU).
    /// Retryable; `retry_after_ms` overrides the backoff delay when present.
    #[error("resource unavailable: {message}")]
    ResourceUnavailable {
        /// Human-readable description of the saturation.
        message: String,
        /// Server-provided wait hint, if any.
        retry_after_ms: Option<u64>,
    },

    /// The analyzer returned output that failed schema validation.
    /// Gets exactly one immediate strict-prompt retry, never backoff.
    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),

    /// Cancellation was observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    /// Whether the retry policy applies to this failure.
    ///
    /// Only transient and resource failures back off and retry;
    /// validation errors and cancellation are final, and malformed
    /// responses follow their own single-retry path.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ResourceUnavailable { .. })
    }

    /// Server-provided wait hint in milliseconds, if the failure carried one.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::ResourceUnavailable { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Classify a raw capability error message by substring patterns.
    ///
    /// Unrecognized messages default to [`StageError::Transient`] so a flaky
    /// capability gets its bounded retries before the file is written off.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
        {
            return Self::ResourceUnavailable {
                message: message.to_string(),
                retry_after_ms: None,
            };
        }
        if lower.contains("unsupported")
            || lower.contains("invalid input")
            || lower.contains("corrupt")
        {
            return Self::Validation(message.to_string());
        }
        Self::Transient(message.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn retryable_variants() {
        assert!(StageError::Transient("timeout".into()).is_retryable());
        assert!(StageError::ResourceUnavailable {
            message: "429".into(),
            retry_after_ms: Some(5000),
        }
        .is_retryable());

        assert!(!StageError::Validation("bad header".into()).is_retryable());
        assert!(!StageError::MalformedResponse("not json".into()).is_retryable());
        assert!(!StageError::Cancelled.is_retryable());
    }

    #[test]
    fn retry_after_only_on_resource_unavailable() {
        let err = StageError::ResourceUnavailable {
            message: "rate limited".into(),
            retry_after_ms: Some(2500),
        };
        assert_eq!(err.retry_after_ms(), Some(2500));
        assert_eq!(StageError::Transient("x".into()).retry_after_ms(), None);
    }

    #[test]
    fn classify_rate_limit_messages() {
        assert_matches!(
            StageError::classify("HTTP 429 Too Many Requests"),
            StageError::ResourceUnavailable { .. }
        );
        assert_matches!(
            StageError::classify("monthly quota exceeded"),
            StageError::ResourceUnavailable { .. }
        );
    }

    #[test]
    fn classify_input_problems_as_validation() {
        assert_matches!(
            StageError::classify("unsupported codec in container"),
            StageError::Validation(_)
        );
        assert_matches!(
            StageError::classify("corrupt frame at offset 4096"),
            StageError::Validation(_)
        );
    }

    #[test]
    fn classify_defaults_to_transient() {
        assert_matches!(
            StageError::classify("connection reset by peer"),
            StageError::Transient(_)
        );
        assert_matches!(StageError::classify("???"), StageError::Transient(_));
    }

    #[test]
    fn display_messages() {
        let err = StageError::Validation("file too large".into());
        assert_eq!(err.to_string(), "validation failed: file too large");
        assert_eq!(StageError::Cancelled.to_string(), "cancelled");
    }
}
