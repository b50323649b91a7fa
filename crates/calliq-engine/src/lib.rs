//! # calliq-engine
//!
//! Pipeline orchestration for the calliq call-quality system: a store-backed
//! queue, a worker pool that walks each audio file through validation,
//! transcription, speaker separation and LLM scoring, and a progress hub
//! that fans per-file events out to subscribers.
//!
//! The crate is capability-agnostic. Real speech-to-text, diarization and
//! LLM backends implement the `calliq-core` traits and arrive packaged in a
//! [`CapabilitySet`]; everything here is about sequencing, checkpointing,
//! retries and failure routing:
//!
//! - **Checkpoint/resume**: every stage transition commits to the store
//!   before it is announced, so a crash resumes at the recorded stage with
//!   all earlier outputs intact
//! - **Retry with backoff**: transient and resource failures retry on an
//!   exponential schedule that survives restarts
//! - **Graceful degradation**: a dead diarizer falls back to a
//!   single-speaker guess, a dead analyzer leaves the transcript usable
//! - **Cooperative cancellation**: cancel flags are honored exactly at
//!   checkpoint writes, never mid-stage
//!
//! [`Engine`] is the embedding surface; construct it with settings and a
//! capability set, call [`Engine::start`], and feed it files with
//! [`Engine::enqueue`].

#![deny(unsafe_code)]

mod analysis;
mod broadcast;
mod engine;
mod errors;
mod merge;
mod orchestrator;
mod selector;
#[cfg(test)]
pub(crate) mod testing;
mod validate;
mod worker;

pub use broadcast::{ProgressBroadcaster, ProgressReceiver};
pub use engine::Engine;
pub use errors::{EngineError, Result};
pub use orchestrator::CapabilitySet;
