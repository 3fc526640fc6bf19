//! Session error types.
//!
//! The taxonomy distinguishes validation errors (caller can correct and
//! retry) from state errors (the operation is not legal for the session's
//! current status). Both are rejected synchronously before any mutation, so
//! classifier methods exist instead of string matching at call sites.

use thiserror::Error;
use uuid::Uuid;

use crate::model::SessionStatus;

/// Errors produced by the session engine and state machine.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The template does not exist or is inactive.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The template has zero steps and zero critical criteria.
    #[error("template {0} has nothing to score")]
    TemplateEmpty(String),

    /// The template definition violates a structural invariant.
    #[error("template {template_id} is invalid: {reason}")]
    TemplateInvalid { template_id: String, reason: String },

    /// A candidate or examiner id could not be resolved.
    #[error("unknown party: {0}")]
    UnknownParty(String),

    /// The step id is not part of the session's template snapshot.
    #[error("unknown step: {0}")]
    UnknownStep(String),

    /// The section id is not part of the session's template snapshot.
    #[error("unknown section: {0}")]
    UnknownSection(String),

    /// The criterion id is not part of the session's template snapshot.
    #[error("unknown critical criterion: {0}")]
    UnknownCriterion(String),

    /// The submitted value does not fit the step's scoring type.
    #[error("invalid score value for step {step_id}: {reason}")]
    InvalidScoreValue { step_id: String, reason: String },

    /// `pause` requires a non-empty reason.
    #[error("pause reason must not be empty")]
    EmptyPauseReason,

    /// `complete` requires a non-empty signature.
    #[error("completion signature must not be empty")]
    EmptySignature,

    /// The operation is not legal from the session's current status.
    #[error("cannot {operation} a session in status {from}")]
    InvalidTransition {
        from: SessionStatus,
        operation: &'static str,
    },

    /// No score or criterion mutation to reverse.
    #[error("nothing to undo")]
    NothingToUndo,

    /// The session has reached a terminal status and is immutable.
    #[error("session {0} is finalized")]
    SessionFinalized(Uuid),

    /// No session with this id exists (or it was discarded).
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Only the owning examiner may mutate a non-terminal session.
    #[error("examiner {examiner_id} does not own this session")]
    NotSessionOwner { examiner_id: String },

    /// The caller lacks the elevated authorization the operation requires.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The operation is only available for practice-mode sessions.
    #[error("session {0} is not a practice session")]
    NotPracticeMode(Uuid),

    /// The operation requires a completed session.
    #[error("session {0} is not completed")]
    NotCompleted(Uuid),

    /// A replayed log references a different template than the snapshot.
    #[error("log expects template {session_template}, snapshot is {snapshot_template}")]
    SnapshotMismatch {
        session_template: Uuid,
        snapshot_template: Uuid,
    },

    /// The mutation log rejected or failed an append.
    #[error("mutation log error: {0}")]
    Log(String),

    /// A notification could not be delivered.
    #[error("notification error: {0}")]
    Notification(String),
}

impl SessionError {
    /// Returns `true` for errors the caller can fix by correcting input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SessionError::TemplateNotFound(_)
                | SessionError::TemplateEmpty(_)
                | SessionError::TemplateInvalid { .. }
                | SessionError::UnknownParty(_)
                | SessionError::UnknownStep(_)
                | SessionError::UnknownSection(_)
                | SessionError::UnknownCriterion(_)
                | SessionError::InvalidScoreValue { .. }
                | SessionError::EmptyPauseReason
                | SessionError::EmptySignature
        )
    }

    /// Returns `true` for errors caused by operating against the wrong
    /// session state, which indicate caller logic issues rather than bad data.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidTransition { .. }
                | SessionError::NothingToUndo
                | SessionError::SessionFinalized(_)
                | SessionError::NotPracticeMode(_)
                | SessionError::NotCompleted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_state_classes_are_disjoint() {
        let validation = SessionError::EmptyPauseReason;
        assert!(validation.is_validation());
        assert!(!validation.is_state());

        let state = SessionError::NothingToUndo;
        assert!(state.is_state());
        assert!(!state.is_validation());

        let other = SessionError::SessionNotFound(Uuid::nil());
        assert!(!other.is_validation());
        assert!(!other.is_state());
    }

    #[test]
    fn invalid_transition_message_names_status() {
        let err = SessionError::InvalidTransition {
            from: SessionStatus::Completed,
            operation: "pause",
        };
        assert_eq!(err.to_string(), "cannot pause a session in status completed");
    }
}
