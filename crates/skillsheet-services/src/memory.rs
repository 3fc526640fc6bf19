//! In-memory backends, for tests and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use skillsheet_core::error::SessionError;
use skillsheet_core::model::TemplateSnapshot;
use skillsheet_core::traits::{Identity, IdentityDirectory, TemplateRepository};

/// Versioned template storage.
///
/// Every published version stays fetchable forever so that sessions pinned
/// to an old snapshot keep working; retiring a template only stops *new*
/// sessions from binding it without an explicit version.
#[derive(Debug, Default)]
pub struct MemoryTemplateRepository {
    versions: Mutex<HashMap<(Uuid, u32), TemplateSnapshot>>,
    retired: Mutex<HashSet<Uuid>>,
    fetches: AtomicU64,
}

impl MemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a template version. Overwrites nothing: re-publishing an
    /// existing (id, version) pair replaces that version only.
    pub fn publish(&self, template: TemplateSnapshot) {
        self.versions
            .lock()
            .unwrap()
            .insert((template.template_id, template.template_version), template);
    }

    /// Retire a template: existing versions remain fetchable by number, but
    /// unversioned fetches start failing.
    pub fn retire(&self, template_id: Uuid) {
        self.retired.lock().unwrap().insert(template_id);
    }

    /// Total fetch calls served, for cache assertions in tests.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    fn latest_version(&self, template_id: Uuid) -> Option<u32> {
        self.versions
            .lock()
            .unwrap()
            .keys()
            .filter(|(id, _)| *id == template_id)
            .map(|(_, v)| *v)
            .max()
    }
}

#[async_trait]
impl TemplateRepository for MemoryTemplateRepository {
    async fn fetch(
        &self,
        template_id: Uuid,
        version: Option<u32>,
    ) -> Result<TemplateSnapshot, SessionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let version = match version {
            Some(v) => v,
            None => {
                if self.retired.lock().unwrap().contains(&template_id) {
                    return Err(SessionError::TemplateNotFound(format!(
                        "{template_id} (retired)"
                    )));
                }
                self.latest_version(template_id)
                    .ok_or_else(|| SessionError::TemplateNotFound(template_id.to_string()))?
            }
        };
        self.versions
            .lock()
            .unwrap()
            .get(&(template_id, version))
            .cloned()
            .ok_or_else(|| SessionError::TemplateNotFound(format!("{template_id} v{version}")))
    }
}

/// In-memory identity directory.
#[derive(Default)]
pub struct MemoryDirectory {
    identities: Mutex<HashMap<String, Identity>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: Identity) {
        self.identities
            .lock()
            .unwrap()
            .insert(identity.id.clone(), identity);
    }

    /// Convenience for tests: register an id with a derived display name.
    pub fn with_members(ids: &[&str]) -> Self {
        let directory = Self::new();
        for id in ids {
            directory.insert(Identity {
                id: id.to_string(),
                display_name: id.to_string(),
                email: None,
            });
        }
        directory
    }
}

#[async_trait]
impl IdentityDirectory for MemoryDirectory {
    async fn resolve(&self, party_id: &str) -> Result<Identity, SessionError> {
        self.identities
            .lock()
            .unwrap()
            .get(party_id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownParty(party_id.to_string()))
    }
}
