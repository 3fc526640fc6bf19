//! Durable operation logs and offline sync.
//!
//! Sessions are folds of an append-only operation log. This crate provides
//! the durable log implementations (in-memory and JSON-lines files) and the
//! coordinator that reconciles a device's local log with a remote durable
//! store once connectivity returns.

pub mod coordinator;
pub mod error;
pub mod oplog;
pub mod store;

pub use coordinator::{
    ConflictAudit, ConflictWinner, SyncCoordinator, SyncCoordinatorConfig, SyncOutcome,
};
pub use error::SyncError;
pub use oplog::{FileOpLog, LogEntry, MemoryOpLog, OpLog};
pub use store::{AckOutcome, DurableStore, MemoryStore};
