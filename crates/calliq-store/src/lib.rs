//! # calliq-store
//!
//! SQLite-backed queue and checkpoint state for the calliq pipeline.
//!
//! The store is the single source of truth for file progress. Workers lease
//! files out of it, write stage outputs and checkpoints back into it, and
//! resume from it after a crash:
//!
//! - **Connection**: r2d2 pool with WAL and pragma tuning
//! - **Migrations**: versioned schema applied at open
//! - **Repositories**: stateless row-level access over `&Connection`
//! - **Store**: [`PipelineStore`], the transactional facade workers use
//!
//! Cancellation never interrupts a stage mid-flight; it is observed at the
//! next checkpoint write, which returns [`CheckpointOutcome::Cancelled`]
//! after finalizing the row.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repository;
pub mod store;
pub mod types;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use errors::{Result, StoreError};
pub use store::{PipelineStore, CANCELLED_ERROR};
pub use types::{
    CheckpointOutcome, EnqueueOutcome, FileRecord, FileSnapshot, NewFile, ReleaseOutcome,
    StageCheckpoint, StageOutput,
};
