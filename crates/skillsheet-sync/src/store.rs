//! The remote durable store the coordinator reconciles against.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SyncError;
use crate::oplog::LogEntry;

/// Outcome of acknowledging a single log entry.
///
/// `Duplicate` means the store had already seen this (session, seq) pair; it
/// is a success, not an error, so redelivery after a lost ack is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Applied,
    Duplicate,
}

/// Server-side durable storage for session operation logs.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Record one log entry. Idempotent on (session, seq).
    async fn acknowledge(&self, entry: &LogEntry) -> Result<AckOutcome, SyncError>;

    /// Highest acknowledged sequence number for a session, 0 if none.
    async fn max_acked_seq(&self, session_id: Uuid) -> Result<u64, SyncError>;

    /// The stored entry at a given sequence number, if any.
    async fn entry_at(&self, session_id: Uuid, seq: u64) -> Result<Option<LogEntry>, SyncError>;

    /// Drop every stored entry with `seq >= from_seq` and store the given
    /// replacements. Used when conflict resolution picks the other branch.
    async fn overwrite_from(
        &self,
        session_id: Uuid,
        from_seq: u64,
        entries: &[LogEntry],
    ) -> Result<(), SyncError>;

    /// Remove a session entirely (authorized deletion).
    async fn delete_session(&self, session_id: Uuid) -> Result<(), SyncError>;
}

/// In-memory store with failure injection, for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<Uuid, Vec<LogEntry>>>,
    /// Number of upcoming `acknowledge` calls that should fail.
    fail_remaining: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` acknowledge calls fail with a store error.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn entries_for(&self, session_id: Uuid) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn acknowledge(&self, entry: &LogEntry) -> Result<AckOutcome, SyncError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(SyncError::Store("injected failure".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        let log = entries.entry(entry.session_id).or_default();
        if log.iter().any(|e| e.seq == entry.seq) {
            return Ok(AckOutcome::Duplicate);
        }
        log.push(entry.clone());
        log.sort_by_key(|e| e.seq);
        Ok(AckOutcome::Applied)
    }

    async fn max_acked_seq(&self, session_id: Uuid) -> Result<u64, SyncError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&session_id)
            .and_then(|log| log.last())
            .map(|e| e.seq)
            .unwrap_or(0))
    }

    async fn entry_at(&self, session_id: Uuid, seq: u64) -> Result<Option<LogEntry>, SyncError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&session_id)
            .and_then(|log| log.iter().find(|e| e.seq == seq))
            .cloned())
    }

    async fn overwrite_from(
        &self,
        session_id: Uuid,
        from_seq: u64,
        replacements: &[LogEntry],
    ) -> Result<(), SyncError> {
        let mut entries = self.entries.lock().unwrap();
        let log = entries.entry(session_id).or_default();
        log.retain(|e| e.seq < from_seq);
        log.extend_from_slice(replacements);
        log.sort_by_key(|e| e.seq);
        Ok(())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<(), SyncError> {
        self.entries.lock().unwrap().remove(&session_id);
        Ok(())
    }
}
