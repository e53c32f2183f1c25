//! The DRM client trait.
//!
//! # Contract
//!
//! ```text
//!   connect() ──→ allocate_template() ──→ set_*() ──→ submit() ──→ query_status() ──→ wait()
//!                        │                                              │
//!                 release_template()                                control()
//! ```
//!
//! | Method | Returns | Notes |
//! |--------|---------|-------|
//! | `connect()` | `()` | rejects unsupported contact strings |
//! | `allocate_template()` | `TemplateHandle` | |
//! | `set_attribute()` | `()` | may reject the value format |
//! | `submit()` | `JobId` | job starts queued or on hold |
//! | `submit_bulk()` | `BulkSubmission` | provided; may be partial |
//! | `control()` | `()` | DRM decides whether the transition is legal |
//! | `query_status()` | `RawJobState` | `InvalidJob` for unknown ids |
//! | `wait()` | `RawExit` | `ExitTimeout` while the job is still active |

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DrmResult;
use crate::job::{Action, JobId, TemplateHandle};
use crate::raw::{RawExit, RawJobState};

/// Outcome of a bulk submission.
///
/// `job_ids` holds every job the DRM accepted, in the order it assigned
/// them. When fewer than requested were accepted, `error` carries the DRM's
/// reason for stopping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSubmission {
    /// Accepted job ids, in DRM order.
    pub job_ids: Vec<JobId>,
    /// Diagnostic for the first rejected job, if any.
    pub error: Option<String>,
}

impl BulkSubmission {
    /// A bulk submission where every job was accepted.
    pub fn complete(job_ids: Vec<JobId>) -> Self {
        Self {
            job_ids,
            error: None,
        }
    }
}

/// Client interface to a distributed resource manager.
///
/// Implementations MUST be `Send + Sync`; the session shares one instance
/// behind an `Arc`. Every method except `name()` talks to the DRM and is
/// async.
#[async_trait]
pub trait Drm: Send + Sync {
    /// Name of the DRM implementation.
    fn name(&self) -> &str;

    /// Whether submitted jobs keep running after `disconnect`.
    fn jobs_outlive_session(&self) -> bool {
        true
    }

    /// Connect to the DRM identified by `contact`.
    async fn connect(&self, contact: &str) -> DrmResult<()>;

    /// Disengage from the DRM.
    async fn disconnect(&self) -> DrmResult<()>;

    /// Allocate an empty DRM-side job template.
    async fn allocate_template(&self) -> DrmResult<TemplateHandle>;

    /// Release a DRM-side job template.
    async fn release_template(&self, handle: TemplateHandle) -> DrmResult<()>;

    /// Set a scalar template attribute.
    async fn set_attribute(&self, handle: TemplateHandle, name: &str, value: &str)
    -> DrmResult<()>;

    /// Clear a scalar template attribute.
    ///
    /// Default implementation writes an empty value, which DRMs treat as unset.
    async fn unset_attribute(&self, handle: TemplateHandle, name: &str) -> DrmResult<()> {
        self.set_attribute(handle, name, "").await
    }

    /// Set a vector template attribute.
    async fn set_vector_attribute(
        &self,
        handle: TemplateHandle,
        name: &str,
        values: &[String],
    ) -> DrmResult<()>;

    /// Submit one job from a template.
    async fn submit(&self, handle: TemplateHandle) -> DrmResult<JobId>;

    /// Submit `count` identical jobs from a template.
    ///
    /// Default implementation submits one job at a time and stops at the
    /// first rejection, reporting the jobs accepted so far.
    async fn submit_bulk(&self, handle: TemplateHandle, count: u32) -> DrmResult<BulkSubmission> {
        let mut job_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match self.submit(handle).await {
                Ok(job_id) => job_ids.push(job_id),
                Err(e) if job_ids.is_empty() => return Err(e),
                Err(e) => {
                    return Ok(BulkSubmission {
                        job_ids,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(BulkSubmission::complete(job_ids))
    }

    /// Send a control action to a job.
    async fn control(&self, job_id: &JobId, action: Action) -> DrmResult<()>;

    /// Query the current status of a job.
    async fn query_status(&self, job_id: &JobId) -> DrmResult<RawJobState>;

    /// Reap a finished job, waiting at most `timeout` for it to finish.
    ///
    /// Returns [`DrmError::ExitTimeout`] if the job is still active when the
    /// timeout elapses.
    async fn wait(&self, job_id: &JobId, timeout: Duration) -> DrmResult<RawExit>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DrmError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Accepts `capacity` submissions, then rejects.
    struct LimitedDrm {
        capacity: u64,
        counter: AtomicU64,
        submitted: Mutex<Vec<JobId>>,
    }

    impl LimitedDrm {
        fn new(capacity: u64) -> Self {
            Self {
                capacity,
                counter: AtomicU64::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Drm for LimitedDrm {
        fn name(&self) -> &str {
            "limited"
        }

        async fn connect(&self, _contact: &str) -> DrmResult<()> {
            Ok(())
        }

        async fn disconnect(&self) -> DrmResult<()> {
            Ok(())
        }

        async fn allocate_template(&self) -> DrmResult<TemplateHandle> {
            Ok(TemplateHandle(1))
        }

        async fn release_template(&self, _handle: TemplateHandle) -> DrmResult<()> {
            Ok(())
        }

        async fn set_attribute(
            &self,
            _handle: TemplateHandle,
            _name: &str,
            _value: &str,
        ) -> DrmResult<()> {
            Ok(())
        }

        async fn set_vector_attribute(
            &self,
            _handle: TemplateHandle,
            _name: &str,
            _values: &[String],
        ) -> DrmResult<()> {
            Ok(())
        }

        async fn submit(&self, _handle: TemplateHandle) -> DrmResult<JobId> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            if n >= self.capacity {
                return Err(DrmError::SubmissionRejected("queue full".into()));
            }
            let id = JobId::new(n.to_string());
            self.submitted.lock().unwrap().push(id.clone());
            Ok(id)
        }

        async fn control(&self, _job_id: &JobId, _action: Action) -> DrmResult<()> {
            Ok(())
        }

        async fn query_status(&self, _job_id: &JobId) -> DrmResult<RawJobState> {
            Ok(RawJobState::DONE)
        }

        async fn wait(&self, _job_id: &JobId, _timeout: Duration) -> DrmResult<RawExit> {
            Ok(RawExit::new(crate::raw::RawWaitStatus::exited(0)))
        }
    }

    #[tokio::test]
    async fn test_default_bulk_complete() {
        let drm = LimitedDrm::new(10);
        let bulk = drm.submit_bulk(TemplateHandle(1), 4).await.unwrap();
        assert_eq!(bulk.job_ids.len(), 4);
        assert!(bulk.error.is_none());
        assert_eq!(*drm.submitted.lock().unwrap(), bulk.job_ids);
    }

    #[tokio::test]
    async fn test_default_bulk_partial() {
        let drm = LimitedDrm::new(2);
        let bulk = drm.submit_bulk(TemplateHandle(1), 5).await.unwrap();
        assert_eq!(bulk.job_ids.len(), 2);
        assert!(bulk.error.unwrap().contains("queue full"));
    }

    #[tokio::test]
    async fn test_default_bulk_none_accepted() {
        let drm = LimitedDrm::new(0);
        let err = drm.submit_bulk(TemplateHandle(1), 3).await.unwrap_err();
        assert!(matches!(err, DrmError::SubmissionRejected(_)));
    }
}
