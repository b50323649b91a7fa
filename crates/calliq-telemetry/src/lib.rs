//! # calliq-telemetry
//!
//! Tracing setup and in-memory pipeline metrics.
//!
//! - [`init_subscriber`] / [`init_json_subscriber`] — process-wide tracing
//!   with `RUST_LOG` taking precedence over the configured level
//! - [`PipelineMetrics`] — atomic counters/gauges shared across workers,
//!   read out as a [`MetricsSnapshot`]

#![deny(unsafe_code)]

mod metrics;

pub use metrics::{MetricsSnapshot, PipelineMetrics};

use tracing_subscriber::EnvFilter;

/// Initialize a compact, human-readable subscriber on stderr.
///
/// `directive` is the default filter (e.g. `"info"` or
/// `"info,calliq_engine=debug"`); `RUST_LOG` overrides it when set.
/// Calling this more than once is a no-op.
pub fn init_subscriber(directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}

/// Initialize a JSON-lines subscriber on stderr, for log shippers.
///
/// Same filter semantics and idempotency as [`init_subscriber`].
pub fn init_json_subscriber(directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .json()
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
