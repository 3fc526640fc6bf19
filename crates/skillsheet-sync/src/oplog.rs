//! Append-only operation logs.
//!
//! Every session mutation is appended here before it is applied in memory,
//! so a crash or a dead battery never loses scored work. The file-backed log
//! writes one JSON document per line to `<root>/<session-id>.jsonl`, which
//! keeps appends cheap and recovery a line-by-line read.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skillsheet_core::error::SessionError;
use skillsheet_core::session::Operation;
use skillsheet_core::traits::MutationLog;

use crate::error::SyncError;

/// A single durable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub session_id: Uuid,
    /// Monotonic per-session sequence number, starting at 1.
    pub seq: u64,
    /// When the operation was recorded on the originating device.
    pub recorded_at: DateTime<Utc>,
    pub op: Operation,
}

/// A mutation log whose entries can be read back for replay and sync.
#[async_trait]
pub trait OpLog: MutationLog {
    /// All entries for a session, in sequence order.
    async fn entries(&self, session_id: Uuid) -> Result<Vec<LogEntry>, SyncError>;

    /// Sessions with at least one entry.
    async fn session_ids(&self) -> Result<Vec<Uuid>, SyncError>;

    /// Replace a session's entries wholesale. Used when a sync conflict
    /// resolves in favor of the remote branch.
    async fn replace(&self, session_id: Uuid, entries: &[LogEntry]) -> Result<(), SyncError>;
}

/// In-memory log, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryOpLog {
    entries: Mutex<HashMap<Uuid, Vec<LogEntry>>>,
    finalized: Mutex<HashSet<Uuid>>,
}

impl MemoryOpLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MutationLog for MemoryOpLog {
    async fn append(&self, session_id: Uuid, op: &Operation) -> Result<u64, SessionError> {
        if self.finalized.lock().unwrap().contains(&session_id) {
            return Err(SessionError::SessionFinalized(session_id));
        }
        let mut entries = self.entries.lock().unwrap();
        let log = entries.entry(session_id).or_default();
        let seq = log.len() as u64 + 1;
        log.push(LogEntry {
            session_id,
            seq,
            recorded_at: op.at(),
            op: op.clone(),
        });
        Ok(seq)
    }

    async fn mark_finalized(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.finalized.lock().unwrap().insert(session_id);
        Ok(())
    }

    async fn purge(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.entries.lock().unwrap().remove(&session_id);
        self.finalized.lock().unwrap().remove(&session_id);
        Ok(())
    }
}

#[async_trait]
impl OpLog for MemoryOpLog {
    async fn entries(&self, session_id: Uuid) -> Result<Vec<LogEntry>, SyncError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn session_ids(&self) -> Result<Vec<Uuid>, SyncError> {
        Ok(self.entries.lock().unwrap().keys().copied().collect())
    }

    async fn replace(&self, session_id: Uuid, entries: &[LogEntry]) -> Result<(), SyncError> {
        self.entries
            .lock()
            .unwrap()
            .insert(session_id, entries.to_vec());
        Ok(())
    }
}

/// File-backed log: one JSON-lines file per session plus a `.final` marker
/// once the session is sealed.
pub struct FileOpLog {
    root: PathBuf,
    /// Next sequence number per session, recovered lazily from disk.
    next_seq: Mutex<HashMap<Uuid, u64>>,
}

impl FileOpLog {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            next_seq: Mutex::new(HashMap::new()),
        })
    }

    fn log_path(&self, session_id: Uuid) -> PathBuf {
        self.root.join(format!("{session_id}.jsonl"))
    }

    fn final_marker(&self, session_id: Uuid) -> PathBuf {
        self.root.join(format!("{session_id}.final"))
    }

    fn read_entries(path: &Path) -> Result<Vec<LogEntry>, SyncError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn recovered_next_seq(&self, session_id: Uuid) -> Result<u64, SyncError> {
        let mut next_seq = self.next_seq.lock().unwrap();
        if let Some(seq) = next_seq.get(&session_id) {
            return Ok(*seq);
        }
        let entries = Self::read_entries(&self.log_path(session_id))?;
        let next = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        next_seq.insert(session_id, next);
        Ok(next)
    }
}

#[async_trait]
impl MutationLog for FileOpLog {
    async fn append(&self, session_id: Uuid, op: &Operation) -> Result<u64, SessionError> {
        if self.final_marker(session_id).exists() {
            return Err(SessionError::SessionFinalized(session_id));
        }
        let seq = self
            .recovered_next_seq(session_id)
            .map_err(|e| SessionError::Log(e.to_string()))?;
        let entry = LogEntry {
            session_id,
            seq,
            recorded_at: op.at(),
            op: op.clone(),
        };
        let write = || -> Result<(), SyncError> {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path(session_id))?;
            let line = serde_json::to_string(&entry)?;
            writeln!(file, "{line}")?;
            file.sync_all()?;
            Ok(())
        };
        write().map_err(|e| SessionError::Log(e.to_string()))?;
        self.next_seq.lock().unwrap().insert(session_id, seq + 1);
        Ok(seq)
    }

    async fn mark_finalized(&self, session_id: Uuid) -> Result<(), SessionError> {
        std::fs::write(self.final_marker(session_id), b"")
            .map_err(|e| SessionError::Log(e.to_string()))
    }

    async fn purge(&self, session_id: Uuid) -> Result<(), SessionError> {
        for path in [self.log_path(session_id), self.final_marker(session_id)] {
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| SessionError::Log(e.to_string()))?;
            }
        }
        self.next_seq.lock().unwrap().remove(&session_id);
        Ok(())
    }
}

#[async_trait]
impl OpLog for FileOpLog {
    async fn entries(&self, session_id: Uuid) -> Result<Vec<LogEntry>, SyncError> {
        Self::read_entries(&self.log_path(session_id))
    }

    async fn session_ids(&self) -> Result<Vec<Uuid>, SyncError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(id) = stem.parse() {
                        ids.push(id);
                    }
                }
            }
        }
        Ok(ids)
    }

    async fn replace(&self, session_id: Uuid, entries: &[LogEntry]) -> Result<(), SyncError> {
        let mut content = String::new();
        for entry in entries {
            content.push_str(&serde_json::to_string(entry)?);
            content.push('\n');
        }
        std::fs::write(self.log_path(session_id), content)?;
        let next = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        self.next_seq.lock().unwrap().insert(session_id, next);
        Ok(())
    }
}
