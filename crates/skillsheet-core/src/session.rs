//! The session aggregate and its state machine.
//!
//! A session is the fold of its operation log: every mutation is an
//! [`Operation`] value, validated against the current status before being
//! applied, and a session can always be rebuilt by replaying its log from
//! the `create` entry. The in-memory aggregate is a cache of that fold.
//!
//! Lifecycle: `not_started → in_progress ⇄ paused → {completed, cancelled}`,
//! with `draft` reachable from any pre-terminal state and re-enterable into
//! `in_progress`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::model::{
    CriticalResult, PauseEntry, ScoreValue, SessionMode, SessionStatus, StepResult,
    TemplateSnapshot,
};
use crate::scoring::{self, ScoreSummary};
use crate::timer::SessionTimer;

/// A single mutating operation on a session.
///
/// Every variant carries a wall-clock audit timestamp. Timer-affecting
/// variants additionally carry the elapsed active time recorded at emission,
/// so replaying a log reconstructs `time_elapsed` exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Genesis entry: binds template, parties, mode, and attempt number.
    Create {
        at: DateTime<Utc>,
        session_id: Uuid,
        template_id: Uuid,
        template_version: u32,
        candidate_id: String,
        examiner_id: String,
        attempt_number: u32,
        mode: SessionMode,
    },
    Start {
        at: DateTime<Utc>,
    },
    Pause {
        at: DateTime<Utc>,
        reason: String,
        time_elapsed_ms: u64,
    },
    Resume {
        at: DateTime<Utc>,
    },
    ScoreStep {
        at: DateTime<Utc>,
        step_id: String,
        value: ScoreValue,
    },
    ToggleCritical {
        at: DateTime<Utc>,
        criterion_id: String,
        triggered: bool,
        notes: Option<String>,
    },
    FlagStep {
        at: DateTime<Utc>,
        step_id: String,
        reason: String,
    },
    UnflagStep {
        at: DateTime<Utc>,
        step_id: String,
    },
    UndoLast {
        at: DateTime<Utc>,
    },
    SetVisibility {
        at: DateTime<Utc>,
        visible: bool,
    },
    SetOverallNotes {
        at: DateTime<Utc>,
        text: String,
    },
    SetSectionNotes {
        at: DateTime<Utc>,
        section_id: String,
        text: String,
    },
    Complete {
        at: DateTime<Utc>,
        signature: String,
        time_elapsed_ms: u64,
    },
    Cancel {
        at: DateTime<Utc>,
        time_elapsed_ms: u64,
    },
    SaveDraft {
        at: DateTime<Utc>,
        time_elapsed_ms: u64,
    },
    ReactivateDraft {
        at: DateTime<Utc>,
    },
}

impl Operation {
    /// Name used in transition errors and audit logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Start { .. } => "start",
            Operation::Pause { .. } => "pause",
            Operation::Resume { .. } => "resume",
            Operation::ScoreStep { .. } => "score_step",
            Operation::ToggleCritical { .. } => "toggle_critical_criterion",
            Operation::FlagStep { .. } => "flag_step",
            Operation::UnflagStep { .. } => "unflag_step",
            Operation::UndoLast { .. } => "undo",
            Operation::SetVisibility { .. } => "set_visibility",
            Operation::SetOverallNotes { .. } => "set_overall_notes",
            Operation::SetSectionNotes { .. } => "set_section_notes",
            Operation::Complete { .. } => "complete",
            Operation::Cancel { .. } => "cancel",
            Operation::SaveDraft { .. } => "save_draft",
            Operation::ReactivateDraft { .. } => "reactivate_draft",
        }
    }

    /// Audit timestamp carried by the operation.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Operation::Create { at, .. }
            | Operation::Start { at }
            | Operation::Pause { at, .. }
            | Operation::Resume { at }
            | Operation::ScoreStep { at, .. }
            | Operation::ToggleCritical { at, .. }
            | Operation::FlagStep { at, .. }
            | Operation::UnflagStep { at, .. }
            | Operation::UndoLast { at }
            | Operation::SetVisibility { at, .. }
            | Operation::SetOverallNotes { at, .. }
            | Operation::SetSectionNotes { at, .. }
            | Operation::Complete { at, .. }
            | Operation::Cancel { at, .. }
            | Operation::SaveDraft { at, .. }
            | Operation::ReactivateDraft { at } => *at,
        }
    }
}

/// What the single-level undo slot holds: the state to restore, keyed by
/// what was overwritten. Inverse data, not a history stack, keeps memory
/// bounded.
#[derive(Debug, Clone)]
enum UndoEntry {
    Step {
        step_id: String,
        previous: Option<StepResult>,
    },
    Criterion {
        criterion_id: String,
        previous: Option<CriticalResult>,
    },
}

/// The mutable aggregate root for one exam administration.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub template_id: Uuid,
    pub template_version: u32,
    pub candidate_id: String,
    pub examiner_id: String,
    pub attempt_number: u32,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Ordered pause intervals with wall-clock timestamps for audit display.
    pub pause_log: Vec<PauseEntry>,
    pub step_results: BTreeMap<String, StepResult>,
    pub critical_results: BTreeMap<String, CriticalResult>,
    /// Derived totals, recomputed after every successful mutation.
    pub summary: ScoreSummary,
    pub overall_notes: Option<String>,
    pub section_notes: BTreeMap<String, String>,
    pub signature: Option<String>,
    pub visible_to_candidate: bool,
    snapshot: Arc<TemplateSnapshot>,
    timer: SessionTimer,
    undo: Option<UndoEntry>,
}

impl Session {
    /// Build a fresh `not_started` session from its genesis operation.
    pub fn from_create(
        snapshot: Arc<TemplateSnapshot>,
        op: &Operation,
    ) -> Result<Self, SessionError> {
        let Operation::Create {
            session_id,
            template_id,
            template_version,
            candidate_id,
            examiner_id,
            attempt_number,
            mode,
            ..
        } = op
        else {
            return Err(SessionError::Log(format!(
                "expected create as the first log entry, got {}",
                op.name()
            )));
        };
        if *template_id != snapshot.template_id {
            return Err(SessionError::SnapshotMismatch {
                session_template: *template_id,
                snapshot_template: snapshot.template_id,
            });
        }

        let timer = SessionTimer::new(snapshot.time_limit());
        let summary = scoring::compute(&snapshot, &BTreeMap::new(), &BTreeMap::new());

        Ok(Session {
            session_id: *session_id,
            template_id: *template_id,
            template_version: *template_version,
            candidate_id: candidate_id.clone(),
            examiner_id: examiner_id.clone(),
            attempt_number: *attempt_number,
            mode: *mode,
            status: SessionStatus::NotStarted,
            started_at: None,
            completed_at: None,
            pause_log: Vec::new(),
            step_results: BTreeMap::new(),
            critical_results: BTreeMap::new(),
            summary,
            overall_notes: None,
            section_notes: BTreeMap::new(),
            signature: None,
            visible_to_candidate: false,
            snapshot,
            timer,
            undo: None,
        })
    }

    /// Rebuild a session by folding its operation log. The first operation
    /// must be the genesis `create` entry; the rest are applied in order.
    /// This is the canonical recovery path after a crash.
    ///
    /// When the log ends with the timer running, the open interval up to the
    /// last logged operation is reconstructed from the operations' wall-clock
    /// timestamps. Active time between the last logged operation and the
    /// crash is unrecoverable and not credited.
    pub fn replay(
        snapshot: Arc<TemplateSnapshot>,
        ops: &[Operation],
    ) -> Result<Self, SessionError> {
        let (first, rest) = ops
            .split_first()
            .ok_or_else(|| SessionError::Log("empty operation log".into()))?;
        let mut session = Session::from_create(snapshot, first)?;

        let mut running_since: Option<DateTime<Utc>> = None;
        let mut last_at = first.at();
        for op in rest {
            session.apply(op)?;
            last_at = op.at();
            match op {
                Operation::Start { at }
                | Operation::Resume { at }
                | Operation::ReactivateDraft { at } => running_since = Some(*at),
                // These carry the exact elapsed value; nothing left open.
                Operation::Pause { .. }
                | Operation::Complete { .. }
                | Operation::Cancel { .. }
                | Operation::SaveDraft { .. } => running_since = None,
                _ => {}
            }
        }

        if session.status == SessionStatus::InProgress {
            if let Some(since) = running_since {
                let open = (last_at - since).to_std().unwrap_or_default();
                session.timer.add_accrued(open);
            }
        }
        Ok(session)
    }

    pub fn snapshot(&self) -> &Arc<TemplateSnapshot> {
        &self.snapshot
    }

    /// Accumulated active time, excluding paused intervals.
    pub fn time_elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn time_elapsed_ms(&self) -> u64 {
        self.time_elapsed().as_millis() as u64
    }

    /// Time left before the template's limit, if one is configured.
    pub fn time_remaining(&self) -> Option<Duration> {
        self.timer.remaining()
    }

    /// Whether the time-limit-violation criterion has already been recorded.
    pub fn time_limit_triggered(&self) -> bool {
        self.snapshot
            .time_limit_criterion()
            .and_then(|c| self.critical_results.get(&c.id))
            .map(|r| r.triggered)
            .unwrap_or(false)
    }

    /// If the time limit has expired and the template defines a
    /// time-limit-violation criterion that is not yet triggered, return the
    /// operation that records the violation. The caller appends it to the
    /// log ahead of whatever state-changing call observed the expiry.
    pub fn auto_trigger_if_expired(&self) -> Option<Operation> {
        self.auto_trigger_if_expired_at(Instant::now())
    }

    pub fn auto_trigger_if_expired_at(&self, now: Instant) -> Option<Operation> {
        if !matches!(
            self.status,
            SessionStatus::InProgress | SessionStatus::Paused
        ) {
            return None;
        }
        let criterion = self.snapshot.time_limit_criterion()?;
        if self.time_limit_triggered() || !self.timer.expired_at(now) {
            return None;
        }
        Some(Operation::ToggleCritical {
            at: Utc::now(),
            criterion_id: criterion.id.clone(),
            triggered: true,
            notes: Some("time limit exceeded".into()),
        })
    }

    /// Check an operation against the current state without mutating.
    ///
    /// The engine calls this before appending to the write-ahead log so the
    /// log never records an operation the state machine would reject.
    pub fn validate(&self, op: &Operation) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::SessionFinalized(self.session_id));
        }

        let transition_err = || SessionError::InvalidTransition {
            from: self.status,
            operation: op.name(),
        };

        match op {
            Operation::Create { .. } => Err(transition_err()),
            Operation::Start { .. } => match self.status {
                SessionStatus::NotStarted => Ok(()),
                _ => Err(transition_err()),
            },
            Operation::Pause { reason, .. } => {
                if self.status != SessionStatus::InProgress {
                    return Err(transition_err());
                }
                if reason.trim().is_empty() {
                    return Err(SessionError::EmptyPauseReason);
                }
                Ok(())
            }
            Operation::Resume { .. } => match self.status {
                SessionStatus::Paused => Ok(()),
                _ => Err(transition_err()),
            },
            Operation::ScoreStep { step_id, value, .. } => {
                self.require_scoring_state(op)?;
                let step = self
                    .snapshot
                    .find_step(step_id)
                    .ok_or_else(|| SessionError::UnknownStep(step_id.clone()))?;
                scoring::validate_score_value(step, value).map(|_| ())
            }
            Operation::ToggleCritical { criterion_id, .. } => {
                self.require_scoring_state(op)?;
                self.snapshot
                    .find_criterion(criterion_id)
                    .map(|_| ())
                    .ok_or_else(|| SessionError::UnknownCriterion(criterion_id.clone()))
            }
            Operation::FlagStep { step_id, .. } | Operation::UnflagStep { step_id, .. } => self
                .snapshot
                .find_step(step_id)
                .map(|_| ())
                .ok_or_else(|| SessionError::UnknownStep(step_id.clone())),
            Operation::UndoLast { .. } => {
                self.require_scoring_state(op)?;
                if self.undo.is_none() {
                    return Err(SessionError::NothingToUndo);
                }
                Ok(())
            }
            Operation::SetVisibility { .. } | Operation::SetOverallNotes { .. } => Ok(()),
            Operation::SetSectionNotes { section_id, .. } => self
                .snapshot
                .find_section(section_id)
                .map(|_| ())
                .ok_or_else(|| SessionError::UnknownSection(section_id.clone())),
            Operation::Complete { signature, .. } => {
                self.require_scoring_state(op)?;
                if signature.trim().is_empty() {
                    return Err(SessionError::EmptySignature);
                }
                Ok(())
            }
            // Valid from any non-terminal state; re-saving a draft is an
            // idempotent no-op.
            Operation::Cancel { .. } | Operation::SaveDraft { .. } => Ok(()),
            Operation::ReactivateDraft { .. } => match self.status {
                SessionStatus::Draft => Ok(()),
                _ => Err(transition_err()),
            },
        }
    }

    fn require_scoring_state(&self, op: &Operation) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::InProgress | SessionStatus::Paused => Ok(()),
            _ => Err(SessionError::InvalidTransition {
                from: self.status,
                operation: op.name(),
            }),
        }
    }

    /// Validate and apply a single operation, recomputing derived totals
    /// after any score or criterion mutation.
    pub fn apply(&mut self, op: &Operation) -> Result<(), SessionError> {
        self.validate(op)?;

        match op {
            Operation::Create { .. } => unreachable!("rejected by validate"),
            Operation::Start { at } => {
                self.started_at = Some(*at);
                self.status = SessionStatus::InProgress;
                self.timer.start();
                self.undo = None;
            }
            Operation::Pause {
                at,
                reason,
                time_elapsed_ms,
            } => {
                self.pause_log.push(PauseEntry {
                    paused_at: *at,
                    resumed_at: None,
                    reason: reason.clone(),
                });
                self.timer.pause();
                self.timer
                    .set_accrued(Duration::from_millis(*time_elapsed_ms));
                self.status = SessionStatus::Paused;
            }
            Operation::Resume { at } => {
                if let Some(entry) = self.pause_log.iter_mut().rev().find(|e| e.resumed_at.is_none())
                {
                    entry.resumed_at = Some(*at);
                }
                self.timer.start();
                self.status = SessionStatus::InProgress;
            }
            Operation::ScoreStep { step_id, value, .. } => {
                // validate() confirmed the step exists and the value fits.
                let step = self.snapshot.find_step(step_id).cloned();
                let step = step.ok_or_else(|| SessionError::UnknownStep(step_id.clone()))?;
                let previous = self.step_results.get(step_id).cloned();
                let mut result = scoring::validate_score_value(&step, value)?;
                // Rescoring keeps flag and note metadata.
                if let Some(prev) = &previous {
                    result.flagged = prev.flagged;
                    result.flag_reason = prev.flag_reason.clone();
                    result.notes = prev.notes.clone();
                }
                self.step_results.insert(step_id.clone(), result);
                self.undo = Some(UndoEntry::Step {
                    step_id: step_id.clone(),
                    previous,
                });
                self.recompute();
            }
            Operation::ToggleCritical {
                criterion_id,
                triggered,
                notes,
                ..
            } => {
                let previous = self.critical_results.get(criterion_id).cloned();
                let entry = CriticalResult {
                    triggered: *triggered,
                    notes: notes
                        .clone()
                        .or_else(|| previous.as_ref().and_then(|p| p.notes.clone())),
                };
                self.critical_results.insert(criterion_id.clone(), entry);
                self.undo = Some(UndoEntry::Criterion {
                    criterion_id: criterion_id.clone(),
                    previous,
                });
                self.recompute();
            }
            Operation::FlagStep {
                step_id, reason, ..
            } => {
                let entry = self.step_results.entry(step_id.clone()).or_default();
                entry.flagged = true;
                entry.flag_reason = Some(reason.clone());
            }
            Operation::UnflagStep { step_id, .. } => {
                if let Some(entry) = self.step_results.get_mut(step_id) {
                    entry.flagged = false;
                    entry.flag_reason = None;
                }
            }
            Operation::UndoLast { .. } => {
                match self.undo.take() {
                    Some(UndoEntry::Step { step_id, previous }) => {
                        // Flags are metadata-only: one applied after the
                        // score survives its reversal.
                        let (flagged, flag_reason) = self
                            .step_results
                            .get(&step_id)
                            .map(|r| (r.flagged, r.flag_reason.clone()))
                            .unwrap_or((false, None));
                        match previous {
                            Some(mut prev) => {
                                prev.flagged = flagged;
                                prev.flag_reason = flag_reason;
                                self.step_results.insert(step_id, prev);
                            }
                            None if flagged => {
                                self.step_results.insert(
                                    step_id,
                                    StepResult {
                                        flagged,
                                        flag_reason,
                                        ..Default::default()
                                    },
                                );
                            }
                            None => {
                                self.step_results.remove(&step_id);
                            }
                        }
                    }
                    Some(UndoEntry::Criterion {
                        criterion_id,
                        previous,
                    }) => match previous {
                        Some(prev) => {
                            self.critical_results.insert(criterion_id, prev);
                        }
                        None => {
                            self.critical_results.remove(&criterion_id);
                        }
                    },
                    None => unreachable!("rejected by validate"),
                }
                self.recompute();
            }
            Operation::SetVisibility { visible, .. } => {
                self.visible_to_candidate = *visible;
            }
            Operation::SetOverallNotes { text, .. } => {
                self.overall_notes = Some(text.clone());
            }
            Operation::SetSectionNotes {
                section_id, text, ..
            } => {
                self.section_notes.insert(section_id.clone(), text.clone());
            }
            Operation::Complete {
                at,
                signature,
                time_elapsed_ms,
            } => {
                // Stops the timer, auto-pausing if still running.
                self.timer.pause();
                self.timer
                    .set_accrued(Duration::from_millis(*time_elapsed_ms));
                self.completed_at = Some(*at);
                self.signature = Some(signature.clone());
                self.status = SessionStatus::Completed;
                self.undo = None;
                self.recompute();
            }
            Operation::Cancel {
                time_elapsed_ms, ..
            } => {
                self.timer.pause();
                self.timer
                    .set_accrued(Duration::from_millis(*time_elapsed_ms));
                self.status = SessionStatus::Cancelled;
                self.undo = None;
            }
            Operation::SaveDraft {
                time_elapsed_ms, ..
            } => {
                self.timer.pause();
                self.timer
                    .set_accrued(Duration::from_millis(*time_elapsed_ms));
                self.status = SessionStatus::Draft;
                self.undo = None;
            }
            Operation::ReactivateDraft { at } => {
                if self.started_at.is_none() {
                    self.started_at = Some(*at);
                }
                self.timer.start();
                self.status = SessionStatus::InProgress;
                self.undo = None;
            }
        }
        Ok(())
    }

    fn recompute(&mut self) {
        self.summary = scoring::compute(&self.snapshot, &self.step_results, &self.critical_results);
    }
}
