//! Sync-layer errors.

use thiserror::Error;
use uuid::Uuid;

/// Errors from durable logs and the sync coordinator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Log file could not be read or written.
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A log entry could not be encoded or decoded.
    #[error("log entry serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The session's log is finalized and rejects further appends.
    #[error("session {0} is finalized, log is append-locked")]
    SessionFinalized(Uuid),

    /// The durable store kept failing past the retry budget.
    #[error("sync for session {session_id} gave up after {attempts} attempts")]
    RetriesExhausted { session_id: Uuid, attempts: u32 },

    /// The durable store rejected a request.
    #[error("durable store error: {0}")]
    Store(String),
}
