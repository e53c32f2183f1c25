//! Job submission, observation and control.

use std::sync::Arc;

use drmjobs_drm::{Action, Drm, DrmError, JobId};
use futures::future::{join_all, try_join_all};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{CoreError, CoreResult};
use crate::status::{JobExit, JobStatus};
use crate::template::JobTemplate;

/// Drives jobs through the DRM.
///
/// Holds no per-job state: every answer comes from the DRM.
pub struct JobController {
    drm: Arc<dyn Drm>,
    config: SessionConfig,
}

impl JobController {
    /// Create a controller for `drm`.
    pub fn new(drm: Arc<dyn Drm>, config: SessionConfig) -> Self {
        Self { drm, config }
    }

    /// The polling configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Submit one job from a template.
    pub async fn run_job(&self, template: &JobTemplate) -> CoreResult<JobId> {
        let job_id = self
            .drm
            .submit(template.handle())
            .await
            .map_err(|e| submission_error(e, 1))?;
        template.record_submissions(1);
        info!("Submitted job {} from template {}", job_id, template.id());
        Ok(job_id)
    }

    /// Submit `count` identical jobs from a template.
    ///
    /// Returns exactly `count` ids in DRM order. If the DRM accepts fewer,
    /// the error carries the ids it did accept; those jobs are not cancelled.
    pub async fn run_bulk_jobs(&self, template: &JobTemplate, count: u32) -> CoreResult<Vec<JobId>> {
        if count == 0 {
            return Err(CoreError::rejected(
                "bulk submission needs at least one job",
                0,
            ));
        }

        let bulk = self
            .drm
            .submit_bulk(template.handle(), count)
            .await
            .map_err(|e| submission_error(e, count))?;
        template.record_submissions(bulk.job_ids.len() as u32);

        if bulk.job_ids.len() > count as usize {
            warn!(
                "Bulk submission from template {} returned {} job ids for {} requested",
                template.id(),
                bulk.job_ids.len(),
                count
            );
            return Err(CoreError::Submission {
                message: format!(
                    "DRM returned {} job ids for {} requested",
                    bulk.job_ids.len(),
                    count
                ),
                requested: count,
                accepted: bulk.job_ids,
            });
        }
        if bulk.job_ids.len() < count as usize {
            let message = bulk.error.unwrap_or_else(|| {
                format!("DRM accepted only {} of {} jobs", bulk.job_ids.len(), count)
            });
            warn!(
                "Bulk submission from template {} incomplete: {} of {} accepted",
                template.id(),
                bulk.job_ids.len(),
                count
            );
            return Err(CoreError::Submission {
                message,
                requested: count,
                accepted: bulk.job_ids,
            });
        }

        info!(
            "Submitted {} jobs from template {} ({}..{})",
            count,
            template.id(),
            bulk.job_ids[0],
            bulk.job_ids[bulk.job_ids.len() - 1]
        );
        Ok(bulk.job_ids)
    }

    /// Current status of a job.
    ///
    /// Jobs the DRM does not know are `Undetermined`.
    pub async fn job_status(&self, job_id: &JobId) -> CoreResult<JobStatus> {
        match self.drm.query_status(job_id).await {
            Ok(raw) => {
                let status = JobStatus::from_raw(raw);
                if status == JobStatus::Undetermined {
                    debug!("Job {} reported raw state {}", job_id, raw);
                }
                Ok(status)
            }
            Err(DrmError::InvalidJob(_)) => {
                debug!("Job {} unknown to the DRM", job_id);
                Ok(JobStatus::Undetermined)
            }
            Err(e) => Err(CoreError::from_drm(e)),
        }
    }

    /// Status of several jobs, positionally.
    ///
    /// Each id is resolved on its own; a failed query yields `Undetermined`.
    pub async fn job_statuses(&self, job_ids: &[JobId]) -> Vec<JobStatus> {
        let queries = job_ids.iter().map(|job_id| async move {
            self.job_status(job_id).await.unwrap_or_else(|e| {
                warn!("Status of job {} undetermined: {}", job_id, e);
                JobStatus::Undetermined
            })
        });
        join_all(queries).await
    }

    /// Send a control action. The DRM decides whether it is legal.
    pub async fn control(&self, job_id: &JobId, action: Action) -> CoreResult<()> {
        self.drm
            .control(job_id, action)
            .await
            .map_err(|e| control_error(e, job_id, action))?;
        info!("Sent {} to job {}", action, job_id);
        Ok(())
    }

    /// Wait for a job to finish and reap it.
    ///
    /// Polls with exponential backoff until the DRM reports a terminal (or
    /// undetermined) state, then collects the exit record.
    pub async fn wait(&self, job_id: &JobId) -> CoreResult<JobExit> {
        let deadline = self.config.max_wait().map(|max| Instant::now() + max);
        let max_interval = self.config.max_poll_interval();
        let mut interval = self.config.poll_interval();
        let mut failures = 0u32;

        loop {
            let ready = match self.drm.query_status(job_id).await {
                Ok(raw) => {
                    failures = 0;
                    let status = JobStatus::from_raw(raw);
                    debug!("Job {} status: {}", job_id, status);
                    status.is_terminal() || status == JobStatus::Undetermined
                }
                Err(DrmError::InvalidJob(_)) => true,
                Err(e) if e.is_connection_failure() => {
                    failures += 1;
                    if failures > self.config.max_query_failures {
                        return Err(CoreError::Connection(e.to_string()));
                    }
                    warn!(
                        "Status query for job {} failed ({}/{}): {}",
                        job_id, failures, self.config.max_query_failures, e
                    );
                    false
                }
                Err(e) => return Err(CoreError::Drm(e)),
            };

            if ready {
                match self.drm.wait(job_id, self.config.reap_timeout()).await {
                    Ok(raw) => {
                        let exit = JobExit::from_raw(job_id.clone(), raw);
                        info!("Job {} finished: {}", job_id, exit.status);
                        return Ok(exit);
                    }
                    Err(DrmError::InvalidJob(_)) => {
                        return Ok(JobExit::undetermined(job_id.clone()));
                    }
                    Err(DrmError::ExitTimeout(_)) => {
                        debug!("Job {} not reapable yet", job_id);
                    }
                    Err(e) if e.is_connection_failure() => {
                        failures += 1;
                        if failures > self.config.max_query_failures {
                            return Err(CoreError::Connection(e.to_string()));
                        }
                    }
                    Err(e) => return Err(CoreError::Drm(e)),
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CoreError::Timeout(job_id.clone()));
                    }
                    interval.min(deadline - now)
                }
                None => interval,
            };
            sleep(pause).await;
            interval = (interval * 2).min(max_interval);
        }
    }

    /// Wait for every job, concurrently. Results are positional.
    pub async fn synchronize(&self, job_ids: &[JobId]) -> CoreResult<Vec<JobExit>> {
        try_join_all(job_ids.iter().map(|job_id| self.wait(job_id))).await
    }

    /// Suspend a running job or hold a queued one.
    ///
    /// Returns whether an action was sent.
    pub async fn stop_job(&self, job_id: &JobId) -> CoreResult<bool> {
        let action = match self.job_status(job_id).await? {
            JobStatus::Running => Action::Suspend,
            JobStatus::QueuedActive => Action::Hold,
            status => {
                debug!("Not stopping job {} in state {}", job_id, status);
                return Ok(false);
            }
        };
        self.control(job_id, action).await?;
        Ok(true)
    }

    /// Resume a user-suspended job or release a user-held one.
    ///
    /// Returns whether an action was sent.
    pub async fn restart_job(&self, job_id: &JobId) -> CoreResult<bool> {
        let action = match self.job_status(job_id).await? {
            JobStatus::UserSuspended | JobStatus::UserSystemSuspended => Action::Resume,
            JobStatus::UserOnHold | JobStatus::UserSystemOnHold => Action::Release,
            status => {
                debug!("Not restarting job {} in state {}", job_id, status);
                return Ok(false);
            }
        };
        self.control(job_id, action).await?;
        Ok(true)
    }

    /// Terminate a job that has not finished.
    ///
    /// Returns whether an action was sent.
    pub async fn kill_job(&self, job_id: &JobId) -> CoreResult<bool> {
        let status = self.job_status(job_id).await?;
        if status.is_terminal() || status == JobStatus::Undetermined {
            debug!("Not killing job {} in state {}", job_id, status);
            return Ok(false);
        }
        self.control(job_id, Action::Terminate).await?;
        Ok(true)
    }
}

fn submission_error(e: DrmError, requested: u32) -> CoreError {
    match e {
        DrmError::SubmissionRejected(message) => CoreError::rejected(message, requested),
        e if e.is_connection_failure() => CoreError::Connection(e.to_string()),
        DrmError::InvalidTemplate(_) | DrmError::Io(_) => CoreError::Drm(e),
        other => CoreError::rejected(other.to_string(), requested),
    }
}

fn control_error(e: DrmError, job_id: &JobId, action: Action) -> CoreError {
    if e.is_connection_failure() {
        return CoreError::Connection(e.to_string());
    }
    let message = match e {
        DrmError::InvalidTransition { message, .. } => message,
        other => other.to_string(),
    };
    CoreError::Control {
        job_id: job_id.clone(),
        action,
        message,
    }
}
