//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production default values.
//! Types marked with `#[serde(default)]` allow partial JSON — missing fields
//! get their default value during deserialization.

use calliq_core::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root settings type for the calliq pipeline.
///
/// Loaded from `~/.calliq/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// All field names are camelCase. Example:
///
/// ```json
/// {
///   "version": "0.1.0",
///   "pipeline": { "workers": 4 },
///   "retry": { "maxRetries": 3 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalliqSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Worker pool and queue behavior.
    pub pipeline: PipelineSettings,
    /// Backoff schedule for retryable stage failures.
    pub retry: RetryPolicy,
    /// Speaker-separation strategy knobs.
    pub diarization: DiarizationSettings,
    /// Quality-analysis knobs.
    pub analysis: AnalysisSettings,
    /// Upload acceptance limits.
    pub limits: LimitSettings,
    /// Database location and pool tuning.
    pub storage: StorageSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for CalliqSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "calliq".to_string(),
            pipeline: PipelineSettings::default(),
            retry: RetryPolicy::default(),
            diarization: DiarizationSettings::default(),
            analysis: AnalysisSettings::default(),
            limits: LimitSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Worker pool and queue behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    /// Concurrent pipeline workers.
    pub workers: usize,
    /// Queue lease duration; a crashed worker's file becomes leasable again
    /// this many seconds after its last checkpoint.
    pub lease_secs: u64,
    /// Idle poll interval when the queue is empty.
    pub poll_interval_ms: u64,
    /// Concurrent slots for the GPU-bound capabilities.
    pub gpu_slots: usize,
    /// Hard wall-clock cap on a single stage attempt.
    pub stage_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            lease_secs: 300,
            poll_interval_ms: 1000,
            gpu_slots: 1,
            stage_timeout_secs: 600,
        }
    }
}

/// Speaker-separation strategy knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiarizationSettings {
    /// Model confidence below this flags the result as low confidence.
    pub low_confidence_threshold: f64,
    /// More inferred speakers than this flags the result as multi speaker.
    pub max_expected_speakers: u32,
}

impl Default for DiarizationSettings {
    fn default() -> Self {
        Self {
            low_confidence_threshold: 70.0,
            max_expected_speakers: 2,
        }
    }
}

/// Quality-analysis knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisSettings {
    /// Cap on the client-context summary sent alongside operator text.
    pub client_context_max_chars: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            client_context_max_chars: 600,
        }
    }
}

/// Upload acceptance limits, enforced by the Validating stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitSettings {
    /// Maximum file size in mebibytes.
    pub max_file_size_mb: u64,
    /// Minimum audio duration in seconds.
    pub min_duration_secs: u64,
    /// Maximum audio duration in seconds (4 hours).
    pub max_duration_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 500,
            min_duration_secs: 3,
            max_duration_secs: 14_400,
        }
    }
}

/// Database location and pool tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// SQLite database path. A leading `~/` expands to the home directory.
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// SQLite page cache size in KiB.
    pub cache_size_kib: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "~/.calliq/calliq.db".to_string(),
            pool_size: 16,
            busy_timeout_ms: 30_000,
            cache_size_kib: 8192,
        }
    }
}

impl StorageSettings {
    /// Database path with a leading `~/` expanded to `$HOME`.
    #[must_use]
    pub fn resolved_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            return PathBuf::from(home).join(rest);
        }
        PathBuf::from(&self.db_path)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter directive (e.g. `info`, `calliq_engine=debug`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
