//! The DRM session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use drmjobs_drm::{Action, Drm, JobId};
use tracing::{info, warn};
use uuid::Uuid;

use crate::attribute::{ScalarAttribute, VectorAttribute};
use crate::config::SessionConfig;
use crate::controller::JobController;
use crate::error::{CoreError, CoreResult};
use crate::registry::TemplateRegistry;
use crate::status::{JobExit, JobStatus};
use crate::template::{JobTemplate, TemplateId};

/// Set while a session is active anywhere in the process.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; every operation is available.
    Active,
    /// `exit` has run; every operation fails.
    Closed,
}

/// A connection to one DRM.
///
/// At most one session is active per process. The session owns the template
/// registry and the job controller; every operation on them goes through the
/// session so that nothing runs after `exit`.
pub struct Session {
    id: Uuid,
    contact: String,
    state: SessionState,
    drm: Arc<dyn Drm>,
    registry: TemplateRegistry,
    controller: JobController,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("contact", &self.contact)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to `drm` through `contact` and open the session.
    pub async fn init(
        drm: Arc<dyn Drm>,
        contact: &str,
        config: SessionConfig,
    ) -> CoreResult<Self> {
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::Session(
                "a session is already active in this process".to_string(),
            ));
        }

        if let Err(e) = drm.connect(contact).await {
            SESSION_ACTIVE.store(false, Ordering::Release);
            return Err(CoreError::Session(format!(
                "cannot connect to '{}': {}",
                contact, e
            )));
        }

        let id = Uuid::new_v4();
        info!(session = %id, "Session opened on {} ({})", drm.name(), contact);

        Ok(Self {
            id,
            contact: contact.to_string(),
            state: SessionState::Active,
            registry: TemplateRegistry::new(drm.clone()),
            controller: JobController::new(drm.clone(), config),
            drm,
        })
    }

    /// Close the session and disconnect from the DRM.
    ///
    /// Fails while templates remain. A disconnect failure still closes the
    /// session.
    pub async fn exit(&mut self) -> CoreResult<()> {
        self.ensure_active()?;
        if !self.registry.is_empty() {
            let ids: Vec<String> = self.registry.ids().iter().map(ToString::to_string).collect();
            return Err(CoreError::Session(format!(
                "job templates still allocated: {}",
                ids.join(", ")
            )));
        }

        let result = self.drm.disconnect().await;
        self.state = SessionState::Closed;
        SESSION_ACTIVE.store(false, Ordering::Release);
        info!(session = %self.id, "Session closed");

        result.map_err(|e| CoreError::Session(format!("disconnect failed: {}", e)))
    }

    fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Closed => Err(CoreError::Session("session is closed".to_string())),
        }
    }

    /// Random id of this session, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Contact string the session was opened with.
    pub fn contact(&self) -> &str {
        &self.contact
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Name of the DRM implementation.
    pub fn drm_name(&self) -> &str {
        self.drm.name()
    }

    /// Whether jobs keep running once this session exits.
    pub fn jobs_outlive_session(&self) -> bool {
        self.drm.jobs_outlive_session()
    }

    /// Polling configuration.
    pub fn config(&self) -> &SessionConfig {
        self.controller.config()
    }

    // Templates

    /// Allocate a new job template.
    pub async fn allocate_job_template(&mut self) -> CoreResult<TemplateId> {
        self.ensure_active()?;
        self.registry.allocate_job_template().await
    }

    /// Delete a job template.
    pub async fn delete_job_template(&mut self, id: TemplateId) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.delete_job_template(id).await
    }

    /// Whether `id` names a live template.
    pub fn is_job_template_id_valid(&self, id: TemplateId) -> bool {
        self.state == SessionState::Active && self.registry.is_job_template_id_valid(id)
    }

    /// Read access to a template.
    pub fn job_template(&self, id: TemplateId) -> CoreResult<&JobTemplate> {
        self.ensure_active()?;
        self.registry.get(id)
    }

    /// Ids of every live template.
    pub fn job_template_ids(&self) -> Vec<TemplateId> {
        self.registry.ids()
    }

    /// Set command and arguments of a template.
    pub async fn set_command(
        &mut self,
        id: TemplateId,
        command: &str,
        args: Vec<String>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.set_command(id, command, args).await
    }

    /// Set a scalar attribute by wire name.
    pub async fn set_attribute(&mut self, id: TemplateId, name: &str, value: &str) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.set_attribute(id, name, value).await
    }

    /// Set a vector attribute by wire name.
    pub async fn set_vector_attribute(
        &mut self,
        id: TemplateId,
        name: &str,
        values: Vec<String>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.set_vector_attribute(id, name, values).await
    }

    /// Set a scalar attribute.
    pub async fn set_scalar(
        &mut self,
        id: TemplateId,
        attribute: ScalarAttribute,
        value: &str,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.set_scalar(id, attribute, value).await
    }

    /// Set a vector attribute.
    pub async fn set_vector(
        &mut self,
        id: TemplateId,
        attribute: VectorAttribute,
        values: Vec<String>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.registry.set_vector(id, attribute, values).await
    }

    // Jobs

    /// Submit one job.
    pub async fn run_job(&self, id: TemplateId) -> CoreResult<JobId> {
        self.ensure_active()?;
        let template = self.registry.get(id)?;
        self.controller.run_job(template).await
    }

    /// Submit `count` identical jobs.
    pub async fn run_bulk_jobs(&self, id: TemplateId, count: u32) -> CoreResult<Vec<JobId>> {
        self.ensure_active()?;
        let template = self.registry.get(id)?;
        self.controller.run_bulk_jobs(template, count).await
    }

    /// Current status of a job.
    pub async fn job_status(&self, job_id: &JobId) -> CoreResult<JobStatus> {
        self.ensure_active()?;
        self.controller.job_status(job_id).await
    }

    /// Status of several jobs.
    pub async fn job_statuses(&self, job_ids: &[JobId]) -> CoreResult<Vec<JobStatus>> {
        self.ensure_active()?;
        Ok(self.controller.job_statuses(job_ids).await)
    }

    /// Send a control action.
    pub async fn control(&self, job_id: &JobId, action: Action) -> CoreResult<()> {
        self.ensure_active()?;
        self.controller.control(job_id, action).await
    }

    /// Wait for a job to finish.
    pub async fn wait(&self, job_id: &JobId) -> CoreResult<JobExit> {
        self.ensure_active()?;
        self.controller.wait(job_id).await
    }

    /// Wait for every job to finish.
    pub async fn synchronize(&self, job_ids: &[JobId]) -> CoreResult<Vec<JobExit>> {
        self.ensure_active()?;
        self.controller.synchronize(job_ids).await
    }

    /// Suspend a running job or hold a queued one.
    pub async fn stop_job(&self, job_id: &JobId) -> CoreResult<bool> {
        self.ensure_active()?;
        self.controller.stop_job(job_id).await
    }

    /// Resume a suspended job or release a held one.
    pub async fn restart_job(&self, job_id: &JobId) -> CoreResult<bool> {
        self.ensure_active()?;
        self.controller.restart_job(job_id).await
    }

    /// Terminate an unfinished job.
    pub async fn kill_job(&self, job_id: &JobId) -> CoreResult<bool> {
        self.ensure_active()?;
        self.controller.kill_job(job_id).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == SessionState::Active {
            warn!(
                session = %self.id,
                "Session dropped without exit; DRM connection to {} not closed",
                self.contact
            );
            SESSION_ACTIVE.store(false, Ordering::Release);
        }
    }
}
