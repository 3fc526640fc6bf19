//! Offline sync coordinator.
//!
//! Replays a device's local operation log into the remote durable store once
//! connectivity returns. Acknowledgements are idempotent on (session, seq),
//! so a lost ack is repaired by redelivery. When the store holds a diverging
//! history for the same session (two devices scored it while offline), the
//! branch whose last operation was recorded later wins, and exactly one
//! conflict audit record captures both branches.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::oplog::{LogEntry, OpLog};
use crate::store::{AckOutcome, DurableStore};

#[derive(Debug, Clone)]
pub struct SyncCoordinatorConfig {
    /// Retries per entry on store errors (not conflicts).
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt, capped at 60s.
    pub retry_delay: Duration,
}

impl Default for SyncCoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Which branch a conflict resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Audit record for a resolved divergence. Both branches are preserved in
/// full so a disputed result can be reviewed after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictAudit {
    pub session_id: Uuid,
    pub at: DateTime<Utc>,
    /// First sequence number at which the histories differ.
    pub divergence_seq: u64,
    pub local_branch: Vec<LogEntry>,
    pub remote_branch: Vec<LogEntry>,
    pub winner: ConflictWinner,
}

/// Result of syncing one session.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    /// Entries the store applied for the first time.
    pub replayed: usize,
    /// Entries the store had already seen.
    pub duplicates: usize,
    pub conflict: Option<ConflictAudit>,
}

/// Reconciles local operation logs with a remote durable store.
pub struct SyncCoordinator {
    log: Arc<dyn OpLog>,
    store: Arc<dyn DurableStore>,
    config: SyncCoordinatorConfig,
}

impl SyncCoordinator {
    pub fn new(
        log: Arc<dyn OpLog>,
        store: Arc<dyn DurableStore>,
        config: SyncCoordinatorConfig,
    ) -> Self {
        Self { log, store, config }
    }

    /// Sync every session the local log knows about.
    pub async fn sync_all(&self) -> Result<Vec<(Uuid, SyncOutcome)>, SyncError> {
        let mut outcomes = Vec::new();
        for session_id in self.log.session_ids().await? {
            let outcome = self.sync_session(session_id).await?;
            outcomes.push((session_id, outcome));
        }
        Ok(outcomes)
    }

    /// Sync a single session's log into the store.
    ///
    /// On store errors the local log stays authoritative; nothing is lost
    /// and the next sync attempt picks up where this one failed.
    pub async fn sync_session(&self, session_id: Uuid) -> Result<SyncOutcome, SyncError> {
        let mut local = self.log.entries(session_id).await?;
        if local.is_empty() {
            return Ok(SyncOutcome::default());
        }

        let mut outcome = SyncOutcome::default();
        if let Some(conflict) = self.resolve_divergence(session_id, &local).await? {
            if conflict.winner == ConflictWinner::Remote {
                // The remote branch replaces our tail; re-read before replay.
                let mut merged: Vec<LogEntry> = local
                    .iter()
                    .filter(|e| e.seq < conflict.divergence_seq)
                    .cloned()
                    .collect();
                merged.extend(conflict.remote_branch.iter().cloned());
                self.log.replace(session_id, &merged).await?;
                local = merged;
            }
            outcome.conflict = Some(conflict);
        }

        let acked = self.store.max_acked_seq(session_id).await?;
        for entry in local.iter().filter(|e| e.seq > acked) {
            match self.acknowledge_with_retry(entry).await? {
                AckOutcome::Applied => outcome.replayed += 1,
                AckOutcome::Duplicate => outcome.duplicates += 1,
            }
        }

        tracing::info!(
            %session_id,
            replayed = outcome.replayed,
            duplicates = outcome.duplicates,
            conflict = outcome.conflict.is_some(),
            "session synced"
        );
        Ok(outcome)
    }

    /// Find the first sequence number where the store's history differs from
    /// ours, and resolve it last-writer-wins by the latest `recorded_at` on
    /// each branch.
    async fn resolve_divergence(
        &self,
        session_id: Uuid,
        local: &[LogEntry],
    ) -> Result<Option<ConflictAudit>, SyncError> {
        let mut divergence_seq = None;
        for entry in local {
            match self.store.entry_at(session_id, entry.seq).await? {
                Some(remote) if remote != *entry => {
                    divergence_seq = Some(entry.seq);
                    break;
                }
                _ => {}
            }
        }
        let Some(divergence_seq) = divergence_seq else {
            return Ok(None);
        };

        let mut remote_branch = Vec::new();
        let mut seq = divergence_seq;
        while let Some(remote) = self.store.entry_at(session_id, seq).await? {
            remote_branch.push(remote);
            seq += 1;
        }
        let local_branch: Vec<LogEntry> = local
            .iter()
            .filter(|e| e.seq >= divergence_seq)
            .cloned()
            .collect();

        let branch_tip = |branch: &[LogEntry]| branch.iter().map(|e| e.recorded_at).max();
        let winner = if branch_tip(&local_branch) >= branch_tip(&remote_branch) {
            ConflictWinner::Local
        } else {
            ConflictWinner::Remote
        };

        if winner == ConflictWinner::Local {
            self.store
                .overwrite_from(session_id, divergence_seq, &local_branch)
                .await?;
        }

        tracing::warn!(
            %session_id,
            divergence_seq,
            ?winner,
            local_len = local_branch.len(),
            remote_len = remote_branch.len(),
            "diverging session histories reconciled"
        );

        Ok(Some(ConflictAudit {
            session_id,
            at: Utc::now(),
            divergence_seq,
            local_branch,
            remote_branch,
            winner,
        }))
    }

    async fn acknowledge_with_retry(&self, entry: &LogEntry) -> Result<AckOutcome, SyncError> {
        // Retry on transient store errors with exponential backoff
        let mut retry_delay = self.config.retry_delay;
        for retry in 0..=self.config.max_retries {
            if retry > 0 {
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(Duration::from_secs(60));
            }
            match self.store.acknowledge(entry).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::warn!(
                        session_id = %entry.session_id,
                        seq = entry.seq,
                        attempt = retry + 1,
                        "store acknowledge failed: {e}"
                    );
                }
            }
        }
        Err(SyncError::RetriesExhausted {
            session_id: entry.session_id,
            attempts: self.config.max_retries + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::MemoryOpLog;
    use crate::store::MemoryStore;
    use chrono::TimeDelta;
    use skillsheet_core::model::{ScoreValue, SessionMode};
    use skillsheet_core::session::Operation;
    use skillsheet_core::traits::MutationLog;

    fn coordinator(
        log: Arc<MemoryOpLog>,
        store: Arc<MemoryStore>,
    ) -> SyncCoordinator {
        SyncCoordinator::new(
            log,
            store,
            SyncCoordinatorConfig {
                max_retries: 2,
                retry_delay: Duration::from_millis(1),
            },
        )
    }

    fn create_op(session_id: Uuid, at: DateTime<Utc>) -> Operation {
        Operation::Create {
            at,
            session_id,
            template_id: Uuid::new_v4(),
            template_version: 1,
            candidate_id: "cand-1".into(),
            examiner_id: "exam-1".into(),
            attempt_number: 1,
            mode: SessionMode::Official,
        }
    }

    fn score_op(step: &str, passed: bool, at: DateTime<Utc>) -> Operation {
        Operation::ScoreStep {
            at,
            step_id: step.into(),
            value: ScoreValue::Binary { passed },
        }
    }

    #[tokio::test]
    async fn replays_the_whole_log_on_first_sync() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let now = Utc::now();

        log.append(id, &create_op(id, now)).await.unwrap();
        log.append(id, &Operation::Start { at: now }).await.unwrap();
        log.append(id, &score_op("pressure", true, now)).await.unwrap();

        let outcome = coordinator(Arc::clone(&log), Arc::clone(&store))
            .sync_session(id)
            .await
            .unwrap();
        assert_eq!(outcome.replayed, 3);
        assert_eq!(outcome.duplicates, 0);
        assert!(outcome.conflict.is_none());
        assert_eq!(store.entries_for(id).len(), 3);
    }

    #[tokio::test]
    async fn resync_after_lost_acks_reports_duplicates() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let now = Utc::now();

        log.append(id, &create_op(id, now)).await.unwrap();
        log.append(id, &Operation::Start { at: now }).await.unwrap();

        let coordinator = coordinator(Arc::clone(&log), Arc::clone(&store));
        coordinator.sync_session(id).await.unwrap();

        // Simulate a device that never saw the acks and replays everything.
        let entries = log.entries(id).await.unwrap();
        for entry in &entries {
            assert_eq!(
                store.acknowledge(entry).await.unwrap(),
                AckOutcome::Duplicate
            );
        }
        assert_eq!(store.entries_for(id).len(), 2);
    }

    #[tokio::test]
    async fn transient_store_failures_are_retried() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let now = Utc::now();

        log.append(id, &create_op(id, now)).await.unwrap();
        store.fail_next(2);

        let outcome = coordinator(Arc::clone(&log), Arc::clone(&store))
            .sync_session(id)
            .await
            .unwrap();
        assert_eq!(outcome.replayed, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_the_local_log_authoritative() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let now = Utc::now();

        log.append(id, &create_op(id, now)).await.unwrap();
        store.fail_next(10);

        let err = coordinator(Arc::clone(&log), Arc::clone(&store))
            .sync_session(id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));

        // Nothing was lost; a later sync succeeds.
        assert_eq!(log.entries(id).await.unwrap().len(), 1);
        store.fail_next(0);
        let outcome = coordinator(Arc::clone(&log), Arc::clone(&store))
            .sync_session(id)
            .await
            .unwrap();
        assert!(outcome.replayed + outcome.duplicates >= 1);
    }

    /// Two devices scored the same session offline. The branch with the
    /// later last write wins; the losing branch survives in the audit.
    #[tokio::test]
    async fn diverging_histories_resolve_last_writer_wins() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let base = Utc::now();

        // Shared prefix, already synced by device A.
        log.append(id, &create_op(id, base)).await.unwrap();
        log.append(id, &Operation::Start { at: base }).await.unwrap();
        let coordinator = coordinator(Arc::clone(&log), Arc::clone(&store));
        coordinator.sync_session(id).await.unwrap();

        // Device A pushed an older divergent tail directly to the store.
        let remote_tail = LogEntry {
            session_id: id,
            seq: 3,
            recorded_at: base + TimeDelta::seconds(10),
            op: score_op("pressure", false, base + TimeDelta::seconds(10)),
        };
        store.acknowledge(&remote_tail).await.unwrap();

        // Device B (us) scored the same seq later.
        log.append(id, &score_op("pressure", true, base + TimeDelta::seconds(30)))
            .await
            .unwrap();

        let outcome = coordinator.sync_session(id).await.unwrap();
        let conflict = outcome.conflict.expect("conflict should be recorded");
        assert_eq!(conflict.divergence_seq, 3);
        assert_eq!(conflict.winner, ConflictWinner::Local);
        assert_eq!(conflict.local_branch.len(), 1);
        assert_eq!(conflict.remote_branch.len(), 1);

        // The store now holds our branch at seq 3.
        let stored = store.entries_for(id);
        assert_eq!(stored.len(), 3);
        assert!(matches!(
            stored[2].op,
            Operation::ScoreStep { ref value, .. }
                if *value == ScoreValue::Binary { passed: true }
        ));
    }

    #[tokio::test]
    async fn remote_branch_wins_when_it_is_newer() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        let base = Utc::now();

        log.append(id, &create_op(id, base)).await.unwrap();
        let coordinator = coordinator(Arc::clone(&log), Arc::clone(&store));
        coordinator.sync_session(id).await.unwrap();

        let remote_tail = LogEntry {
            session_id: id,
            seq: 2,
            recorded_at: base + TimeDelta::seconds(60),
            op: Operation::Start {
                at: base + TimeDelta::seconds(60),
            },
        };
        store.acknowledge(&remote_tail).await.unwrap();

        // Our divergent tail is older.
        log.append(
            id,
            &Operation::Cancel {
                at: base + TimeDelta::seconds(5),
                time_elapsed_ms: 0,
            },
        )
        .await
        .unwrap();

        let outcome = coordinator.sync_session(id).await.unwrap();
        let conflict = outcome.conflict.expect("conflict should be recorded");
        assert_eq!(conflict.winner, ConflictWinner::Remote);

        // The local log now carries the remote branch.
        let local = log.entries(id).await.unwrap();
        assert_eq!(local.len(), 2);
        assert!(matches!(local[1].op, Operation::Start { .. }));
    }

    #[tokio::test]
    async fn sync_all_covers_every_session() {
        let log = Arc::new(MemoryOpLog::new());
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        log.append(a, &create_op(a, now)).await.unwrap();
        log.append(b, &create_op(b, now)).await.unwrap();

        let outcomes = coordinator(Arc::clone(&log), Arc::clone(&store))
            .sync_all()
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, o)| o.replayed == 1));
    }
}
