//! Content-addressed cache of template snapshots.
//!
//! Snapshots are keyed by `(template_id, template_version)`; re-binding the
//! same version returns the cached, identical snapshot, shared read-only
//! across every session bound to it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::SessionError;
use crate::model::TemplateSnapshot;
use crate::traits::TemplateRepository;

pub struct SnapshotCache {
    repository: Arc<dyn TemplateRepository>,
    cache: Mutex<HashMap<(Uuid, u32), Arc<TemplateSnapshot>>>,
}

impl SnapshotCache {
    pub fn new(repository: Arc<dyn TemplateRepository>) -> Self {
        Self {
            repository,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Materialize a read-only, version-pinned snapshot.
    ///
    /// Fails with [`SessionError::TemplateNotFound`] when the template does
    /// not exist or is inactive, and with [`SessionError::TemplateEmpty`]
    /// when it has zero steps and zero critical criteria.
    pub async fn bind(
        &self,
        template_id: Uuid,
        version: Option<u32>,
    ) -> Result<Arc<TemplateSnapshot>, SessionError> {
        if let Some(version) = version {
            if let Some(cached) = self.cache.lock().await.get(&(template_id, version)) {
                return Ok(Arc::clone(cached));
            }
        }

        let snapshot = self.repository.fetch(template_id, version).await?;
        if snapshot.is_empty() {
            return Err(SessionError::TemplateEmpty(template_id.to_string()));
        }
        // The parser rejects these, but snapshots can also arrive from a
        // repository that never went through it.
        if let Some(step) = snapshot
            .steps()
            .find(|s| !s.point_value.is_finite() || s.point_value < 0.0)
        {
            return Err(SessionError::TemplateInvalid {
                template_id: template_id.to_string(),
                reason: format!(
                    "step {} has point value {}",
                    step.id, step.point_value
                ),
            });
        }

        let key = (snapshot.template_id, snapshot.template_version);
        let mut cache = self.cache.lock().await;
        let entry = cache
            .entry(key)
            .or_insert_with(|| Arc::new(snapshot));
        Ok(Arc::clone(entry))
    }
}
