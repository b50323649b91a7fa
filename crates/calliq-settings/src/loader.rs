//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CalliqSettings::default()`]
//! 2. If `~/.calliq/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::CalliqSettings;

/// Resolve the path to the settings file.
///
/// `CALLIQ_SETTINGS_PATH` overrides the default `~/.calliq/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var("CALLIQ_SETTINGS_PATH") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".calliq").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CalliqSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<CalliqSettings> {
    let defaults = serde_json::to_value(CalliqSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CalliqSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Invalid values are silently ignored (fall back to file/default)
pub fn apply_env_overrides(settings: &mut CalliqSettings) {
    // ── Pipeline settings ───────────────────────────────────────────
    if let Some(v) = read_env_usize("CALLIQ_WORKERS", 1, 64) {
        settings.pipeline.workers = v;
    }
    if let Some(v) = read_env_u64("CALLIQ_LEASE_SECS", 30, 3600) {
        settings.pipeline.lease_secs = v;
    }
    if let Some(v) = read_env_u64("CALLIQ_POLL_INTERVAL_MS", 100, 60_000) {
        settings.pipeline.poll_interval_ms = v;
    }
    if let Some(v) = read_env_usize("CALLIQ_GPU_SLOTS", 1, 8) {
        settings.pipeline.gpu_slots = v;
    }
    if let Some(v) = read_env_u64("CALLIQ_STAGE_TIMEOUT_SECS", 30, 7200) {
        settings.pipeline.stage_timeout_secs = v;
    }

    // ── Retry settings ──────────────────────────────────────────────
    if let Some(v) = read_env_u32("CALLIQ_MAX_RETRIES", 0, 10) {
        settings.retry.max_retries = v;
    }

    // ── Diarization settings ────────────────────────────────────────
    if let Some(v) = read_env_f64("CALLIQ_CONFIDENCE_THRESHOLD", 0.0, 100.0) {
        settings.diarization.low_confidence_threshold = v;
    }

    // ── Limits ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("CALLIQ_MAX_FILE_SIZE_MB", 1, 4096) {
        settings.limits.max_file_size_mb = v;
    }

    // ── Storage and logging ─────────────────────────────────────────
    if let Some(v) = read_env_string("CALLIQ_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string("CALLIQ_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as an `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_simple_override() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": 10});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 10);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "pipeline": {"workers": 1, "leaseSecs": 300}
        });
        let source = serde_json::json!({
            "pipeline": {"workers": 4}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["pipeline"]["workers"], 4);
        assert_eq!(merged["pipeline"]["leaseSecs"], 300);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": 2});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let path = Path::new("/nonexistent/settings.json");
        let settings = load_settings_from_path(path).unwrap();
        let defaults = CalliqSettings::default();
        assert_eq!(settings.version, defaults.version);
        assert_eq!(settings.pipeline.workers, defaults.pipeline.workers);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"pipeline": {"workers": 8}, "retry": {"maxRetries": 5}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.pipeline.workers, 8);
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.pipeline.lease_secs, 300);
        assert_eq!(settings.retry.base_delay_secs, 2);
    }

    #[test]
    fn load_deeply_nested_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"diarization": {"lowConfidenceThreshold": 85.5}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert!((settings.diarization.low_confidence_threshold - 85.5).abs() < f64::EPSILON);
        assert_eq!(settings.diarization.max_expected_speakers, 2);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    // ── parse_u32_range ─────────────────────────────────────────────

    #[test]
    fn parse_u32_valid() {
        assert_eq!(parse_u32_range("3", 0, 10), Some(3));
        assert_eq!(parse_u32_range("0", 0, 10), Some(0));
        assert_eq!(parse_u32_range("10", 0, 10), Some(10));
    }

    #[test]
    fn parse_u32_invalid() {
        assert_eq!(parse_u32_range("11", 0, 10), None);
        assert_eq!(parse_u32_range("-1", 0, 10), None);
        assert_eq!(parse_u32_range("abc", 0, 10), None);
    }

    // ── parse_u64_range ─────────────────────────────────────────────

    #[test]
    fn parse_u64_valid() {
        assert_eq!(parse_u64_range("300", 30, 3600), Some(300));
        assert_eq!(parse_u64_range("30", 30, 3600), Some(30));
    }

    #[test]
    fn parse_u64_out_of_range() {
        assert_eq!(parse_u64_range("5", 30, 3600), None);
        assert_eq!(parse_u64_range("7200", 30, 3600), None);
    }

    // ── parse_usize_range ───────────────────────────────────────────

    #[test]
    fn parse_usize_valid() {
        assert_eq!(parse_usize_range("4", 1, 64), Some(4));
    }

    #[test]
    fn parse_usize_out_of_range() {
        assert_eq!(parse_usize_range("0", 1, 64), None);
        assert_eq!(parse_usize_range("100", 1, 64), None);
    }

    // ── parse_f64_range ─────────────────────────────────────────────

    #[test]
    fn parse_f64_valid() {
        assert_eq!(parse_f64_range("70.5", 0.0, 100.0), Some(70.5));
        assert_eq!(parse_f64_range("0", 0.0, 100.0), Some(0.0));
    }

    #[test]
    fn parse_f64_rejects_out_of_range_and_nan() {
        assert_eq!(parse_f64_range("101", 0.0, 100.0), None);
        assert_eq!(parse_f64_range("-3", 0.0, 100.0), None);
        assert_eq!(parse_f64_range("NaN", 0.0, 100.0), None);
        assert_eq!(parse_f64_range("inf", 0.0, 100.0), None);
    }
}
