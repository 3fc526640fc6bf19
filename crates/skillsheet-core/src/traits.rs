//! Core trait definitions for the external collaborators.
//!
//! These async traits are the interface boundary of the evaluation core:
//! the `skillsheet-services` crate implements the template repository,
//! identity directory, training-record store, and notification sink, and
//! `skillsheet-sync` implements the mutation log.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::model::TemplateSnapshot;
use crate::result::FinalResult;
use crate::session::Operation;

/// Read-only access to the template repository.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Fetch a template, pinned to `version` when given or to the current
    /// active version otherwise. Missing or inactive templates fail with
    /// [`SessionError::TemplateNotFound`].
    async fn fetch(
        &self,
        template_id: Uuid,
        version: Option<u32>,
    ) -> Result<TemplateSnapshot, SessionError>;
}

/// A resolved candidate or examiner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// The member/identity directory.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Resolve a party id. Unknown ids fail with
    /// [`SessionError::UnknownParty`] before any session state is created.
    async fn resolve(&self, party_id: &str) -> Result<Identity, SessionError>;
}

/// The training-record store that receives finalized official results.
#[async_trait]
pub trait TrainingRecordStore: Send + Sync {
    /// Record a finalized result as an immutable completion record.
    /// Must be idempotent on `result.session_id`: repeated delivery after a
    /// sync retry must not create duplicate records.
    async fn record_completion(&self, result: &FinalResult) -> anyhow::Result<()>;
}

/// Sink for emailing practice-mode results.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn email_result(&self, recipient: &str, result: &FinalResult) -> anyhow::Result<()>;
}

/// Write-ahead log for session mutations.
///
/// Every operation is appended here before being applied in memory; the log
/// is the authoritative ordering for a session and the durability guarantee
/// while disconnected.
#[async_trait]
pub trait MutationLog: Send + Sync {
    /// Append an operation, returning its monotonic sequence number.
    /// Appends for finalized sessions fail with
    /// [`SessionError::SessionFinalized`].
    async fn append(&self, session_id: Uuid, op: &Operation) -> Result<u64, SessionError>;

    /// Seal a session's log; further appends are refused.
    async fn mark_finalized(&self, session_id: Uuid) -> Result<(), SessionError>;

    /// Permanently remove a session's log (practice-mode discard, authorized
    /// deletion).
    async fn purge(&self, session_id: Uuid) -> Result<(), SessionError>;
}
