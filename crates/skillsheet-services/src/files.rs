//! File-backed template repository.

use std::path::Path;

use async_trait::async_trait;
use uuid::Uuid;

use skillsheet_core::error::SessionError;
use skillsheet_core::model::TemplateSnapshot;
use skillsheet_core::traits::TemplateRepository;

use crate::error::ServiceError;
use crate::memory::MemoryTemplateRepository;

/// Template repository loaded from a directory of TOML files at startup.
///
/// Templates on disk are treated as published: every file becomes a fetchable
/// version, and the highest version per template id serves unversioned
/// fetches. Editing a file requires a restart; sessions hold their snapshot
/// `Arc` and are unaffected either way.
#[derive(Debug)]
pub struct FileTemplateRepository {
    inner: MemoryTemplateRepository,
}

impl FileTemplateRepository {
    pub fn load(dir: &Path) -> Result<Self, ServiceError> {
        let templates = skillsheet_core::parser::load_template_directory(dir)
            .map_err(|e| ServiceError::TemplateLoad(format!("{e:#}")))?;
        if templates.is_empty() {
            return Err(ServiceError::TemplateLoad(format!(
                "no templates found in {}",
                dir.display()
            )));
        }
        let inner = MemoryTemplateRepository::new();
        for template in templates {
            tracing::debug!(
                template_id = %template.template_id,
                version = template.template_version,
                name = %template.name,
                "loaded template"
            );
            inner.publish(template);
        }
        Ok(Self { inner })
    }
}

#[async_trait]
impl TemplateRepository for FileTemplateRepository {
    async fn fetch(
        &self,
        template_id: Uuid,
        version: Option<u32>,
    ) -> Result<TemplateSnapshot, SessionError> {
        self.inner.fetch(template_id, version).await
    }
}
