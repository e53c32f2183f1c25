//! Template registry: session-local ids for DRM-side job templates.

use std::collections::BTreeMap;
use std::sync::Arc;

use drmjobs_drm::{Drm, DrmError};
use tracing::{debug, info, warn};

use crate::attribute::{ScalarAttribute, VectorAttribute};
use crate::error::{CoreError, CoreResult};
use crate::template::{JobTemplate, TemplateId};

/// Owns every job template of a session.
///
/// Ids are handed out from 0, strictly increasing and never reused, even
/// after deletions. Every mutation goes to the DRM first; the local copy is
/// only updated once the DRM has accepted the change.
pub struct TemplateRegistry {
    drm: Arc<dyn Drm>,
    templates: BTreeMap<TemplateId, JobTemplate>,
    next_id: i64,
}

impl TemplateRegistry {
    /// Create an empty registry backed by `drm`.
    pub fn new(drm: Arc<dyn Drm>) -> Self {
        Self {
            drm,
            templates: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Allocate a new, empty job template.
    pub async fn allocate_job_template(&mut self) -> CoreResult<TemplateId> {
        let handle = self
            .drm
            .allocate_template()
            .await
            .map_err(CoreError::from_drm)?;

        let id = TemplateId(self.next_id);
        self.next_id += 1;
        self.templates.insert(id, JobTemplate::new(id, handle));
        debug!("Allocated job template {} (DRM handle {})", id, handle);
        Ok(id)
    }

    /// Delete a job template and release its DRM-side counterpart.
    pub async fn delete_job_template(&mut self, id: TemplateId) -> CoreResult<()> {
        let handle = self.get(id)?.handle();
        self.drm
            .release_template(handle)
            .await
            .map_err(CoreError::from_drm)?;
        self.templates.remove(&id);
        debug!("Deleted job template {}", id);
        Ok(())
    }

    /// Check whether `id` names a live template.
    pub fn is_job_template_id_valid(&self, id: TemplateId) -> bool {
        !id.is_undefined() && self.templates.contains_key(&id)
    }

    /// Look up a template.
    pub fn get(&self, id: TemplateId) -> CoreResult<&JobTemplate> {
        if !self.is_job_template_id_valid(id) {
            return Err(CoreError::InvalidTemplate(id));
        }
        self.templates.get(&id).ok_or(CoreError::InvalidTemplate(id))
    }

    fn get_mut(&mut self, id: TemplateId) -> CoreResult<&mut JobTemplate> {
        let template = self
            .templates
            .get_mut(&id)
            .ok_or(CoreError::InvalidTemplate(id))?;
        if template.submissions() > 0 {
            warn!(
                "Job template {} modified after {} submission(s); earlier jobs are unaffected",
                id,
                template.submissions()
            );
        }
        Ok(template)
    }

    /// Ids of every live template, ascending.
    pub fn ids(&self) -> Vec<TemplateId> {
        self.templates.keys().copied().collect()
    }

    /// Number of live templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no template is live.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Set a scalar attribute by wire name.
    pub async fn set_attribute(&mut self, id: TemplateId, name: &str, value: &str) -> CoreResult<()> {
        self.get(id)?;
        let attribute: ScalarAttribute = name.parse()?;
        self.set_scalar(id, attribute, value).await
    }

    /// Set a vector attribute by wire name.
    pub async fn set_vector_attribute(
        &mut self,
        id: TemplateId,
        name: &str,
        values: Vec<String>,
    ) -> CoreResult<()> {
        self.get(id)?;
        let attribute: VectorAttribute = name.parse()?;
        self.set_vector(id, attribute, values).await
    }

    /// Set a scalar attribute.
    pub async fn set_scalar(
        &mut self,
        id: TemplateId,
        attribute: ScalarAttribute,
        value: &str,
    ) -> CoreResult<()> {
        let handle = self.get(id)?.handle();
        attribute.validate(value)?;
        self.drm
            .set_attribute(handle, attribute.name(), value)
            .await
            .map_err(|e| attribute_error(attribute.name(), e))?;
        self.get_mut(id)?
            .attributes_mut()
            .set_scalar(attribute, value)?;
        debug!("Template {}: {} = {}", id, attribute, value);
        Ok(())
    }

    /// Set a vector attribute.
    pub async fn set_vector(
        &mut self,
        id: TemplateId,
        attribute: VectorAttribute,
        values: Vec<String>,
    ) -> CoreResult<()> {
        let handle = self.get(id)?.handle();
        attribute.validate(&values)?;
        self.drm
            .set_vector_attribute(handle, attribute.name(), &values)
            .await
            .map_err(|e| attribute_error(attribute.name(), e))?;
        debug!("Template {}: {} = {:?}", id, attribute, values);
        self.get_mut(id)?
            .attributes_mut()
            .set_vector(attribute, values)
    }

    /// Set the command and its arguments as one operation.
    ///
    /// Both values are checked before the DRM is contacted. If the DRM
    /// accepts the command but rejects the arguments, the previous command is
    /// restored, or cleared when there was none.
    pub async fn set_command(
        &mut self,
        id: TemplateId,
        command: &str,
        args: Vec<String>,
    ) -> CoreResult<()> {
        let template = self.get(id)?;
        let previous = template.command().map(str::to_string);
        ScalarAttribute::RemoteCommand.validate(command)?;
        VectorAttribute::Argv.validate(&args)?;

        self.set_scalar(id, ScalarAttribute::RemoteCommand, command)
            .await?;
        if let Err(e) = self.set_vector(id, VectorAttribute::Argv, args).await {
            if let Err(restore) = self.restore_command(id, previous.as_deref()).await {
                warn!(
                    "Template {}: could not restore previous command: {}",
                    id, restore
                );
            }
            return Err(e);
        }
        info!("Template {}: command set to {}", id, command);
        Ok(())
    }

    async fn restore_command(&mut self, id: TemplateId, previous: Option<&str>) -> CoreResult<()> {
        let Some(previous) = previous else {
            let handle = self.get(id)?.handle();
            self.drm
                .unset_attribute(handle, ScalarAttribute::RemoteCommand.name())
                .await
                .map_err(CoreError::from_drm)?;
            self.get_mut(id)?
                .attributes_mut()
                .unset_scalar(ScalarAttribute::RemoteCommand);
            return Ok(());
        };
        self.set_scalar(id, ScalarAttribute::RemoteCommand, previous)
            .await
    }
}

/// Map a DRM rejection of an attribute write.
fn attribute_error(name: &str, e: DrmError) -> CoreError {
    match e {
        DrmError::InvalidAttributeValue { message, .. } => CoreError::AttributeValue {
            name: name.to_string(),
            message,
        },
        other => CoreError::from_drm(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDrm;

    fn registry() -> (Arc<MockDrm>, TemplateRegistry) {
        let drm = Arc::new(MockDrm::new());
        (drm.clone(), TemplateRegistry::new(drm))
    }

    #[tokio::test]
    async fn test_ids_monotonic_across_deletes() {
        let (_, mut registry) = registry();
        let a = registry.allocate_job_template().await.unwrap();
        let b = registry.allocate_job_template().await.unwrap();
        assert_eq!((a, b), (TemplateId(0), TemplateId(1)));

        registry.delete_job_template(b).await.unwrap();
        let c = registry.allocate_job_template().await.unwrap();
        assert_eq!(c, TemplateId(2));
        assert_eq!(registry.ids(), vec![a, c]);
    }

    #[tokio::test]
    async fn test_delete_invalid_ids() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        registry.delete_job_template(id).await.unwrap();

        assert!(matches!(
            registry.delete_job_template(id).await,
            Err(CoreError::InvalidTemplate(t)) if t == id
        ));
        assert!(matches!(
            registry.delete_job_template(TemplateId::UNDEFINED).await,
            Err(CoreError::InvalidTemplate(_))
        ));
        assert!(matches!(
            registry.delete_job_template(TemplateId(99)).await,
            Err(CoreError::InvalidTemplate(_))
        ));
        assert_eq!(drm.released_templates(), 1);
    }

    #[tokio::test]
    async fn test_failed_release_keeps_template() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        drm.set_connected(false);
        assert!(registry.delete_job_template(id).await.is_err());
        assert!(registry.is_job_template_id_valid(id));
    }

    #[tokio::test]
    async fn test_failed_allocation_consumes_no_id() {
        let (drm, mut registry) = registry();
        drm.set_connected(false);
        assert!(matches!(
            registry.allocate_job_template().await,
            Err(CoreError::Connection(_))
        ));
        drm.set_connected(true);
        assert_eq!(registry.allocate_job_template().await.unwrap(), TemplateId(0));
    }

    #[tokio::test]
    async fn test_set_attribute_by_name() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();

        registry
            .set_attribute(id, "drmaa_job_name", "align")
            .await
            .unwrap();
        assert_eq!(
            registry.get(id).unwrap().attributes().scalar(ScalarAttribute::JobName),
            Some("align")
        );
        assert_eq!(drm.attribute(registry.get(id).unwrap().handle(), "drmaa_job_name").as_deref(), Some("align"));

        assert!(matches!(
            registry.set_attribute(id, "drmaa_queue", "short").await,
            Err(CoreError::UnknownAttribute(name)) if name == "drmaa_queue"
        ));
        assert!(matches!(
            registry.set_vector_attribute(id, "drmaa_v_files", vec![]).await,
            Err(CoreError::UnknownAttribute(_))
        ));
        assert!(matches!(
            registry.set_attribute(TemplateId(7), "drmaa_job_name", "x").await,
            Err(CoreError::InvalidTemplate(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_value_never_reaches_drm() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        assert!(matches!(
            registry.set_attribute(id, "drmaa_join_files", "maybe").await,
            Err(CoreError::AttributeValue { .. })
        ));
        assert_eq!(drm.attribute(registry.get(id).unwrap().handle(), "drmaa_join_files"), None);
        assert!(registry.get(id).unwrap().attributes().is_empty());
    }

    #[tokio::test]
    async fn test_drm_rejection_leaves_local_value() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        registry
            .set_attribute(id, "drmaa_job_category", "short")
            .await
            .unwrap();

        drm.reject_attribute("drmaa_job_category");
        let err = registry
            .set_attribute(id, "drmaa_job_category", "long")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AttributeValue { .. }));
        assert_eq!(
            registry
                .get(id)
                .unwrap()
                .attributes()
                .scalar(ScalarAttribute::JobCategory),
            Some("short")
        );
    }

    #[tokio::test]
    async fn test_set_command() {
        let (_, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        registry
            .set_command(id, "/bin/echo", vec!["hi".into()])
            .await
            .unwrap();
        let template = registry.get(id).unwrap();
        assert_eq!(template.command(), Some("/bin/echo"));
        assert_eq!(template.args(), ["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_set_command_restores_on_argv_rejection() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        registry
            .set_command(id, "/bin/true", vec![])
            .await
            .unwrap();

        drm.reject_attribute("drmaa_v_argv");
        assert!(
            registry
                .set_command(id, "/bin/false", vec!["x".into()])
                .await
                .is_err()
        );
        assert_eq!(registry.get(id).unwrap().command(), Some("/bin/true"));
        assert_eq!(
            drm.attribute(registry.get(id).unwrap().handle(), "drmaa_remote_command").as_deref(),
            Some("/bin/true")
        );
    }

    #[tokio::test]
    async fn test_set_command_clears_first_command_on_argv_rejection() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();

        drm.reject_attribute("drmaa_v_argv");
        assert!(matches!(
            registry.set_command(id, "/bin/echo", vec!["hi".into()]).await,
            Err(CoreError::AttributeValue { .. })
        ));

        let template = registry.get(id).unwrap();
        assert_eq!(template.command(), None);
        assert!(template.attributes().is_empty());
        assert_eq!(drm.attribute(template.handle(), "drmaa_remote_command"), None);
    }

    #[tokio::test]
    async fn test_set_command_rejects_empty() {
        let (drm, mut registry) = registry();
        let id = registry.allocate_job_template().await.unwrap();
        assert!(matches!(
            registry.set_command(id, "", vec![]).await,
            Err(CoreError::AttributeValue { .. })
        ));
        assert_eq!(drm.attribute(registry.get(id).unwrap().handle(), "drmaa_remote_command"), None);
    }
}
