//! Central session engine.
//!
//! Mediates every session operation: resolves identities, binds template
//! snapshots, appends each mutation to the write-ahead log before applying
//! it in memory, forwards official results to the training-record store, and
//! handles the practice-mode epilogue and authorized deletion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::SessionError;
use crate::model::{ScoreValue, SessionMode};
use crate::result::FinalResult;
use crate::session::{Operation, Session};
use crate::snapshot::SnapshotCache;
use crate::traits::{IdentityDirectory, MutationLog, NotificationSink, TrainingRecordStore};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionEngineConfig {
    /// Token required for permanently deleting finalized sessions. `None`
    /// disables deletion entirely.
    pub admin_token: Option<String>,
}

/// Audit record emitted for privileged operations.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEvent {
    pub session_id: Uuid,
    pub action: String,
    pub actor: String,
    pub at: DateTime<Utc>,
}

/// The central session engine. Single-writer per session: all mutations are
/// serialized through the engine's session table and mutation log.
pub struct SessionEngine {
    snapshots: SnapshotCache,
    directory: Arc<dyn IdentityDirectory>,
    record_store: Arc<dyn TrainingRecordStore>,
    notifier: Arc<dyn NotificationSink>,
    log: Arc<dyn MutationLog>,
    config: SessionEngineConfig,
    sessions: Mutex<HashMap<Uuid, Session>>,
    /// Next attempt number per (candidate, template).
    attempts: Mutex<HashMap<(String, Uuid), u32>>,
    /// Results already delivered to the record store, for idempotence.
    forwarded: Mutex<HashSet<Uuid>>,
    /// Results awaiting redelivery after a store failure.
    pending: Mutex<Vec<FinalResult>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl SessionEngine {
    pub fn new(
        template_repository: Arc<dyn crate::traits::TemplateRepository>,
        directory: Arc<dyn IdentityDirectory>,
        record_store: Arc<dyn TrainingRecordStore>,
        notifier: Arc<dyn NotificationSink>,
        log: Arc<dyn MutationLog>,
        config: SessionEngineConfig,
    ) -> Self {
        Self {
            snapshots: SnapshotCache::new(template_repository),
            directory,
            record_store,
            notifier,
            log,
            config,
            sessions: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            forwarded: Mutex::new(HashSet::new()),
            pending: Mutex::new(Vec::new()),
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Create a `not_started` session bound to a template snapshot and a
    /// candidate/examiner pair. Identity resolution happens first, before
    /// any timer or scoring state exists.
    pub async fn create_session(
        &self,
        template_id: Uuid,
        template_version: Option<u32>,
        candidate_id: &str,
        examiner_id: &str,
        mode: SessionMode,
    ) -> Result<Uuid, SessionError> {
        self.directory.resolve(candidate_id).await?;
        self.directory.resolve(examiner_id).await?;

        let snapshot = self.snapshots.bind(template_id, template_version).await?;
        let attempt_number = self.next_attempt(candidate_id, template_id).await;
        let session_id = Uuid::new_v4();

        let op = Operation::Create {
            at: Utc::now(),
            session_id,
            template_id: snapshot.template_id,
            template_version: snapshot.template_version,
            candidate_id: candidate_id.to_string(),
            examiner_id: examiner_id.to_string(),
            attempt_number,
            mode,
        };
        self.log.append(session_id, &op).await?;
        let session = Session::from_create(snapshot, &op)?;
        self.sessions.lock().await.insert(session_id, session);

        tracing::info!(%session_id, %template_id, %mode, attempt_number, "session created");
        Ok(session_id)
    }

    async fn next_attempt(&self, candidate_id: &str, template_id: Uuid) -> u32 {
        let mut attempts = self.attempts.lock().await;
        let counter = attempts
            .entry((candidate_id.to_string(), template_id))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    /// Read-only view of a session.
    pub async fn session(&self, session_id: Uuid) -> Result<Session, SessionError> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .cloned()
            .ok_or(SessionError::SessionNotFound(session_id))
    }

    /// Append-then-apply a single operation under the session lock.
    ///
    /// If the session's time limit expired since the last call, the
    /// time-limit-violation criterion is recorded (and logged) first, so the
    /// first state-changing call after expiry carries the auto-trigger.
    async fn mutate(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        build: impl FnOnce(&Session) -> Operation,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or(SessionError::SessionNotFound(session_id))?;
        if session.examiner_id != examiner_id {
            return Err(SessionError::NotSessionOwner {
                examiner_id: examiner_id.to_string(),
            });
        }

        if let Some(auto) = session.auto_trigger_if_expired() {
            if session.validate(&auto).is_ok() {
                self.log.append(session_id, &auto).await?;
                session.apply(&auto)?;
                tracing::info!(%session_id, "time limit exceeded, critical criterion auto-triggered");
            }
        }

        let op = build(session);
        session.validate(&op)?;
        self.log.append(session_id, &op).await?;
        session.apply(&op)?;
        Ok(())
    }

    pub async fn start(&self, session_id: Uuid, examiner_id: &str) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |_| Operation::Start { at: Utc::now() })
            .await
    }

    pub async fn pause(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        reason: &str,
    ) -> Result<(), SessionError> {
        let reason = reason.to_string();
        self.mutate(session_id, examiner_id, |session| Operation::Pause {
            at: Utc::now(),
            reason,
            time_elapsed_ms: session.time_elapsed_ms(),
        })
        .await
    }

    pub async fn resume(&self, session_id: Uuid, examiner_id: &str) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |_| Operation::Resume { at: Utc::now() })
            .await
    }

    pub async fn score_step(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        step_id: &str,
        value: ScoreValue,
    ) -> Result<(), SessionError> {
        let step_id = step_id.to_string();
        self.mutate(session_id, examiner_id, |_| Operation::ScoreStep {
            at: Utc::now(),
            step_id,
            value,
        })
        .await
    }

    pub async fn toggle_critical_criterion(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        criterion_id: &str,
        triggered: bool,
        notes: Option<String>,
    ) -> Result<(), SessionError> {
        let criterion_id = criterion_id.to_string();
        self.mutate(session_id, examiner_id, |_| Operation::ToggleCritical {
            at: Utc::now(),
            criterion_id,
            triggered,
            notes,
        })
        .await
    }

    pub async fn flag_step(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        step_id: &str,
        reason: &str,
    ) -> Result<(), SessionError> {
        let (step_id, reason) = (step_id.to_string(), reason.to_string());
        self.mutate(session_id, examiner_id, |_| Operation::FlagStep {
            at: Utc::now(),
            step_id,
            reason,
        })
        .await
    }

    pub async fn unflag_step(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        step_id: &str,
    ) -> Result<(), SessionError> {
        let step_id = step_id.to_string();
        self.mutate(session_id, examiner_id, |_| Operation::UnflagStep {
            at: Utc::now(),
            step_id,
        })
        .await
    }

    pub async fn undo_last(&self, session_id: Uuid, examiner_id: &str) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |_| Operation::UndoLast { at: Utc::now() })
            .await
    }

    pub async fn set_visibility(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        visible: bool,
    ) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |_| Operation::SetVisibility {
            at: Utc::now(),
            visible,
        })
        .await
    }

    pub async fn set_overall_notes(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        text: &str,
    ) -> Result<(), SessionError> {
        let text = text.to_string();
        self.mutate(session_id, examiner_id, |_| Operation::SetOverallNotes {
            at: Utc::now(),
            text,
        })
        .await
    }

    pub async fn set_section_notes(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        section_id: &str,
        text: &str,
    ) -> Result<(), SessionError> {
        let (section_id, text) = (section_id.to_string(), text.to_string());
        self.mutate(session_id, examiner_id, |_| Operation::SetSectionNotes {
            at: Utc::now(),
            section_id,
            text,
        })
        .await
    }

    pub async fn save_draft(&self, session_id: Uuid, examiner_id: &str) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |session| Operation::SaveDraft {
            at: Utc::now(),
            time_elapsed_ms: session.time_elapsed_ms(),
        })
        .await
    }

    pub async fn reactivate_draft(
        &self,
        session_id: Uuid,
        examiner_id: &str,
    ) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |_| Operation::ReactivateDraft {
            at: Utc::now(),
        })
        .await
    }

    pub async fn cancel(&self, session_id: Uuid, examiner_id: &str) -> Result<(), SessionError> {
        self.mutate(session_id, examiner_id, |session| Operation::Cancel {
            at: Utc::now(),
            time_elapsed_ms: session.time_elapsed_ms(),
        })
        .await?;
        self.log.mark_finalized(session_id).await
    }

    /// Finalize the session: stop the timer, run the final recompute, lock
    /// the log, and for official sessions forward the result to the
    /// training-record store exactly once.
    pub async fn complete(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        signature: &str,
    ) -> Result<FinalResult, SessionError> {
        let signature = signature.to_string();
        self.mutate(session_id, examiner_id, |session| Operation::Complete {
            at: Utc::now(),
            signature,
            time_elapsed_ms: session.time_elapsed_ms(),
        })
        .await?;
        self.log.mark_finalized(session_id).await?;

        let (result, mode) = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&session_id)
                .ok_or(SessionError::SessionNotFound(session_id))?;
            (FinalResult::from_session(session)?, session.mode)
        };

        if mode == SessionMode::Official {
            self.forward(result.clone()).await;
        }
        Ok(result)
    }

    /// Deliver a result to the record store, idempotent on session id.
    /// Failures are queued for [`flush_pending`](Self::flush_pending) rather
    /// than dropped; the local log remains the durability guarantee.
    async fn forward(&self, result: FinalResult) -> bool {
        let session_id = result.session_id;
        if !self.forwarded.lock().await.insert(session_id) {
            return true; // already delivered
        }
        match self.record_store.record_completion(&result).await {
            Ok(()) => {
                tracing::info!(%session_id, "result forwarded to training-record store");
                true
            }
            Err(e) => {
                tracing::warn!(%session_id, error = %format!("{e:#}"), "record store delivery failed, queued for retry");
                self.forwarded.lock().await.remove(&session_id);
                self.pending.lock().await.push(result);
                false
            }
        }
    }

    /// Retry queued record-store deliveries. Returns how many succeeded.
    pub async fn flush_pending(&self) -> usize {
        let queued: Vec<FinalResult> = self.pending.lock().await.drain(..).collect();
        let mut delivered = 0;
        for result in queued {
            if self.forward(result).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Practice-mode epilogue: email the result to a recipient.
    pub async fn email_result(
        &self,
        session_id: Uuid,
        examiner_id: &str,
        recipient: &str,
    ) -> Result<(), SessionError> {
        let result = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&session_id)
                .ok_or(SessionError::SessionNotFound(session_id))?;
            self.require_practice_epilogue(session, examiner_id)?;
            FinalResult::from_session(session)?
        };
        self.notifier
            .email_result(recipient, &result)
            .await
            .map_err(|e| SessionError::Notification(format!("{e:#}")))
    }

    /// Practice-mode epilogue: permanently delete the session and all of its
    /// step/criterion records. Subsequent lookups fail with
    /// [`SessionError::SessionNotFound`].
    pub async fn discard(&self, session_id: Uuid, examiner_id: &str) -> Result<(), SessionError> {
        {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&session_id)
                .ok_or(SessionError::SessionNotFound(session_id))?;
            self.require_practice_epilogue(session, examiner_id)?;
        }
        self.sessions.lock().await.remove(&session_id);
        self.log.purge(session_id).await?;
        tracing::info!(%session_id, "practice session discarded");
        Ok(())
    }

    /// Practice-mode epilogue: create a fresh session against the same
    /// template snapshot and candidate, with an independent attempt number.
    pub async fn retake(
        &self,
        session_id: Uuid,
        examiner_id: &str,
    ) -> Result<Uuid, SessionError> {
        let (snapshot, candidate_id) = {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&session_id)
                .ok_or(SessionError::SessionNotFound(session_id))?;
            self.require_practice_epilogue(session, examiner_id)?;
            (Arc::clone(session.snapshot()), session.candidate_id.clone())
        };

        let attempt_number = self.next_attempt(&candidate_id, snapshot.template_id).await;
        let new_id = Uuid::new_v4();
        let op = Operation::Create {
            at: Utc::now(),
            session_id: new_id,
            template_id: snapshot.template_id,
            template_version: snapshot.template_version,
            candidate_id,
            examiner_id: examiner_id.to_string(),
            attempt_number,
            mode: SessionMode::Practice,
        };
        self.log.append(new_id, &op).await?;
        let session = Session::from_create(snapshot, &op)?;
        self.sessions.lock().await.insert(new_id, session);
        tracing::info!(previous = %session_id, %new_id, attempt_number, "practice retake created");
        Ok(new_id)
    }

    fn require_practice_epilogue(
        &self,
        session: &Session,
        examiner_id: &str,
    ) -> Result<(), SessionError> {
        if session.examiner_id != examiner_id {
            return Err(SessionError::NotSessionOwner {
                examiner_id: examiner_id.to_string(),
            });
        }
        if session.mode != SessionMode::Practice {
            return Err(SessionError::NotPracticeMode(session.session_id));
        }
        if session.status != crate::model::SessionStatus::Completed {
            return Err(SessionError::NotCompleted(session.session_id));
        }
        Ok(())
    }

    /// Permanently delete a finalized session. Requires the elevated admin
    /// token, distinct from ordinary examiner rights, and emits an audit
    /// event recording who deleted what and when.
    pub async fn delete_finalized(
        &self,
        session_id: Uuid,
        actor: &str,
        token: &str,
    ) -> Result<AuditEvent, SessionError> {
        match &self.config.admin_token {
            Some(expected) if expected == token => {}
            _ => {
                return Err(SessionError::NotAuthorized(
                    "finalized-session deletion requires elevated authorization".into(),
                ))
            }
        }
        {
            let sessions = self.sessions.lock().await;
            let session = sessions
                .get(&session_id)
                .ok_or(SessionError::SessionNotFound(session_id))?;
            if !session.status.is_terminal() {
                return Err(SessionError::InvalidTransition {
                    from: session.status,
                    operation: "delete",
                });
            }
        }
        self.sessions.lock().await.remove(&session_id);
        self.log.purge(session_id).await?;

        let event = AuditEvent {
            session_id,
            action: "delete_finalized".into(),
            actor: actor.to_string(),
            at: Utc::now(),
        };
        tracing::warn!(target: "audit", %session_id, actor, "finalized session permanently deleted");
        self.audit.lock().await.push(event.clone());
        Ok(event)
    }

    /// Audit events emitted by privileged operations.
    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CriticalCriterion, ScoringType, Section, SessionStatus, Step, TemplateSnapshot,
    };
    use crate::traits::{Identity, TemplateRepository};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedRepo(TemplateSnapshot);

    #[async_trait]
    impl TemplateRepository for FixedRepo {
        async fn fetch(
            &self,
            template_id: Uuid,
            _version: Option<u32>,
        ) -> Result<TemplateSnapshot, SessionError> {
            if template_id == self.0.template_id {
                Ok(self.0.clone())
            } else {
                Err(SessionError::TemplateNotFound(template_id.to_string()))
            }
        }
    }

    struct FixedDirectory(Vec<&'static str>);

    #[async_trait]
    impl IdentityDirectory for FixedDirectory {
        async fn resolve(&self, party_id: &str) -> Result<Identity, SessionError> {
            if self.0.contains(&party_id) {
                Ok(Identity {
                    id: party_id.into(),
                    display_name: party_id.to_uppercase(),
                    email: None,
                })
            } else {
                Err(SessionError::UnknownParty(party_id.into()))
            }
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        results: std::sync::Mutex<Vec<FinalResult>>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl TrainingRecordStore for RecordingStore {
        async fn record_completion(&self, result: &FinalResult) -> anyhow::Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("store unreachable");
            }
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        emails: std::sync::Mutex<Vec<(String, Uuid)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn email_result(&self, recipient: &str, result: &FinalResult) -> anyhow::Result<()> {
            self.emails
                .lock()
                .unwrap()
                .push((recipient.to_string(), result.session_id));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemLog {
        entries: std::sync::Mutex<HashMap<Uuid, Vec<Operation>>>,
        finalized: std::sync::Mutex<HashSet<Uuid>>,
    }

    #[async_trait]
    impl MutationLog for MemLog {
        async fn append(&self, session_id: Uuid, op: &Operation) -> Result<u64, SessionError> {
            if self.finalized.lock().unwrap().contains(&session_id) {
                return Err(SessionError::SessionFinalized(session_id));
            }
            let mut entries = self.entries.lock().unwrap();
            let ops = entries.entry(session_id).or_default();
            ops.push(op.clone());
            Ok(ops.len() as u64)
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

    fn template() -> TemplateSnapshot {
        TemplateSnapshot {
            template_id: Uuid::new_v4(),
            template_version: 1,
            name: "Bleeding Control".into(),
            passing_percentage: Some(80.0),
            sections: vec![Section {
                id: "control".into(),
                title: "Hemorrhage Control".into(),
                steps: vec![
                    Step {
                        id: "pressure".into(),
                        title: "Applies direct pressure".into(),
                        point_value: 5.0,
                        scoring: ScoringType::Binary,
                        rubric: vec![],
                        required: true,
                    },
                    Step {
                        id: "tourniquet".into(),
                        title: "Applies tourniquet".into(),
                        point_value: 5.0,
                        scoring: ScoringType::Binary,
                        rubric: vec![],
                        required: true,
                    },
                ],
            }],
            critical_criteria: vec![CriticalCriterion {
                id: "bsi".into(),
                description: "Did not take BSI precautions".into(),
                time_limit_violation: false,
            }],
            ..Default::default()
        }
    }

    struct Fixture {
        engine: SessionEngine,
        store: Arc<RecordingStore>,
        sink: Arc<RecordingSink>,
        template_id: Uuid,
    }

    fn fixture() -> Fixture {
        let template = template();
        let template_id = template.template_id;
        let store = Arc::new(RecordingStore::default());
        let sink = Arc::new(RecordingSink::default());
        let engine = SessionEngine::new(
            Arc::new(FixedRepo(template)),
            Arc::new(FixedDirectory(vec!["cand-1", "exam-1", "exam-2"])),
            Arc::clone(&store) as Arc<dyn TrainingRecordStore>,
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            Arc::new(MemLog::default()),
            SessionEngineConfig {
                admin_token: Some("let-me-in".into()),
            },
        );
        Fixture {
            engine,
            store,
            sink,
            template_id,
        }
    }

    async fn completed_session(f: &Fixture, mode: SessionMode) -> Uuid {
        let id = f
            .engine
            .create_session(f.template_id, None, "cand-1", "exam-1", mode)
            .await
            .unwrap();
        f.engine.start(id, "exam-1").await.unwrap();
        f.engine
            .score_step(
                id,
                "exam-1",
                "pressure",
                ScoreValue::Binary { passed: true },
            )
            .await
            .unwrap();
        f.engine
            .score_step(
                id,
                "exam-1",
                "tourniquet",
                ScoreValue::Binary { passed: true },
            )
            .await
            .unwrap();
        f.engine.complete(id, "exam-1", "A. Chen").await.unwrap();
        id
    }

    #[tokio::test]
    async fn unknown_party_fails_before_any_state() {
        let f = fixture();
        let err = f
            .engine
            .create_session(f.template_id, None, "ghost", "exam-1", SessionMode::Official)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownParty(_)));
    }

    #[tokio::test]
    async fn official_completion_forwards_exactly_one_record() {
        let f = fixture();
        let id = completed_session(&f, SessionMode::Official).await;

        let results = f.store.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].session_id, id);
        assert!(results[0].passed);
        assert_eq!(results[0].percentage_score, 100.0);
    }

    #[tokio::test]
    async fn practice_completion_never_reaches_the_record_store() {
        let f = fixture();
        completed_session(&f, SessionMode::Practice).await;
        assert!(f.store.results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_queues_result_and_flush_retries() {
        let f = fixture();
        f.store.fail_next.store(true, Ordering::SeqCst);
        let id = completed_session(&f, SessionMode::Official).await;
        assert!(f.store.results.lock().unwrap().is_empty());

        // The session is still valid locally pending reconciliation.
        let session = f.engine.session(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);

        assert_eq!(f.engine.flush_pending().await, 1);
        assert_eq!(f.store.results.lock().unwrap().len(), 1);

        // Idempotent: a second flush has nothing to deliver.
        assert_eq!(f.engine.flush_pending().await, 0);
        assert_eq!(f.store.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_the_owning_examiner_may_mutate() {
        let f = fixture();
        let id = f
            .engine
            .create_session(f.template_id, None, "cand-1", "exam-1", SessionMode::Official)
            .await
            .unwrap();
        let err = f.engine.start(id, "exam-2").await.unwrap_err();
        assert!(matches!(err, SessionError::NotSessionOwner { .. }));
    }

    #[tokio::test]
    async fn practice_discard_deletes_the_session() {
        let f = fixture();
        let id = completed_session(&f, SessionMode::Practice).await;

        f.engine.discard(id, "exam-1").await.unwrap();
        let err = f.engine.session(id).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotFound(_)));
        assert!(f.store.results.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn discard_refused_for_official_sessions() {
        let f = fixture();
        let id = completed_session(&f, SessionMode::Official).await;
        let err = f.engine.discard(id, "exam-1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotPracticeMode(_)));
    }

    #[tokio::test]
    async fn practice_email_goes_through_the_sink() {
        let f = fixture();
        let id = completed_session(&f, SessionMode::Practice).await;
        f.engine
            .email_result(id, "exam-1", "candidate@example.org")
            .await
            .unwrap();
        let emails = f.sink.emails.lock().unwrap();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0], ("candidate@example.org".to_string(), id));
    }

    #[tokio::test]
    async fn retake_creates_an_independent_attempt() {
        let f = fixture();
        let first = completed_session(&f, SessionMode::Practice).await;
        let second = f.engine.retake(first, "exam-1").await.unwrap();
        assert_ne!(first, second);

        let session = f.engine.session(second).await.unwrap();
        assert_eq!(session.status, SessionStatus::NotStarted);
        assert_eq!(session.attempt_number, 2);
        assert!(session.step_results.is_empty());
    }

    #[tokio::test]
    async fn delete_finalized_requires_elevated_token_and_audits() {
        let f = fixture();
        let id = completed_session(&f, SessionMode::Official).await;

        let err = f
            .engine
            .delete_finalized(id, "admin-1", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthorized(_)));

        let event = f
            .engine
            .delete_finalized(id, "admin-1", "let-me-in")
            .await
            .unwrap();
        assert_eq!(event.session_id, id);
        assert_eq!(event.actor, "admin-1");
        assert!(matches!(
            f.engine.session(id).await.unwrap_err(),
            SessionError::SessionNotFound(_)
        ));
        assert_eq!(f.engine.audit_events().await.len(), 1);
    }

    #[tokio::test]
    async fn delete_refused_for_in_progress_sessions() {
        let f = fixture();
        let id = f
            .engine
            .create_session(f.template_id, None, "cand-1", "exam-1", SessionMode::Official)
            .await
            .unwrap();
        f.engine.start(id, "exam-1").await.unwrap();
        let err = f
            .engine
            .delete_finalized(id, "admin-1", "let-me-in")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn attempt_numbers_increment_per_candidate_and_template() {
        let f = fixture();
        let a = f
            .engine
            .create_session(f.template_id, None, "cand-1", "exam-1", SessionMode::Official)
            .await
            .unwrap();
        let b = f
            .engine
            .create_session(f.template_id, None, "cand-1", "exam-1", SessionMode::Official)
            .await
            .unwrap();
        assert_eq!(f.engine.session(a).await.unwrap().attempt_number, 1);
        assert_eq!(f.engine.session(b).await.unwrap().attempt_number, 2);
    }
}
