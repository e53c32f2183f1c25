//! Scripted in-memory DRM for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use drmjobs_drm::{
    Action, BulkSubmission, Drm, DrmError, DrmResult, JobId, RawExit, RawJobState, RawWaitStatus, TemplateHandle,
};
use rustc_hash::FxHashMap;

struct ScriptedJob {
    /// Upcoming states; the last one sticks.
    states: VecDeque<RawJobState>,
    exit: RawWaitStatus,
    queries: usize,
    controls: Vec<Action>,
}

impl ScriptedJob {
    fn current(&self) -> RawJobState {
        self.states
            .front()
            .copied()
            .unwrap_or(RawJobState::UNDETERMINED)
    }

    fn advance(&mut self) -> RawJobState {
        self.queries += 1;
        if self.states.len() > 1 {
            self.states.pop_front().unwrap_or(RawJobState::UNDETERMINED)
        } else {
            self.current()
        }
    }

    fn set(&mut self, state: RawJobState) {
        self.states = VecDeque::from([state]);
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    reject_contact: bool,
    fail_disconnect: bool,
    next_handle: u64,
    templates: FxHashMap<TemplateHandle, FxHashMap<String, String>>,
    released: usize,
    rejected_attributes: Vec<String>,
    submit_capacity: Option<usize>,
    submitted: usize,
    bulk_surplus: u32,
    failing_queries: u32,
    jobs: FxHashMap<JobId, ScriptedJob>,
}

/// Scripted DRM. New jobs start `QUEUED_ACTIVE` and stay there until
/// scripted or controlled.
pub(crate) struct MockDrm {
    state: Mutex<MockState>,
}

impl MockDrm {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                connected: true,
                ..Default::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.with(|s| s.connected = connected);
    }

    pub(crate) fn reject_contact(&self) {
        self.with(|s| s.reject_contact = true);
    }

    pub(crate) fn fail_disconnect(&self) {
        self.with(|s| s.fail_disconnect = true);
    }

    pub(crate) fn reject_attribute(&self, name: &str) {
        self.with(|s| s.rejected_attributes.push(name.to_string()));
    }

    pub(crate) fn set_submit_capacity(&self, capacity: usize) {
        self.with(|s| s.submit_capacity = Some(capacity));
    }

    /// Make bulk submissions hand back `surplus` more ids than requested.
    pub(crate) fn set_bulk_surplus(&self, surplus: u32) {
        self.with(|s| s.bulk_surplus = surplus);
    }

    pub(crate) fn fail_next_queries(&self, count: u32) {
        self.with(|s| s.failing_queries = count);
    }

    pub(crate) fn script(&self, job_id: &JobId, states: Vec<RawJobState>, exit: RawWaitStatus) {
        self.with(|s| {
            let job = s.jobs.get_mut(job_id).unwrap();
            job.states = states.into();
            job.exit = exit;
        });
    }

    pub(crate) fn attribute(&self, handle: TemplateHandle, name: &str) -> Option<String> {
        self.with(|s| s.templates.get(&handle)?.get(name).cloned())
    }

    pub(crate) fn released_templates(&self) -> usize {
        self.with(|s| s.released)
    }

    pub(crate) fn submitted(&self) -> usize {
        self.with(|s| s.submitted)
    }

    pub(crate) fn status_queries(&self, job_id: &JobId) -> usize {
        self.with(|s| s.jobs.get(job_id).map_or(0, |j| j.queries))
    }

    pub(crate) fn controls(&self, job_id: &JobId) -> Vec<Action> {
        self.with(|s| s.jobs.get(job_id).map(|j| j.controls.clone()).unwrap_or_default())
    }
}

impl MockState {
    fn ensure_connected(&self) -> DrmResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DrmError::NotConnected)
        }
    }

    fn template(&mut self, handle: TemplateHandle) -> DrmResult<&mut FxHashMap<String, String>> {
        self.templates
            .get_mut(&handle)
            .ok_or(DrmError::InvalidTemplate(handle))
    }

    fn check_attribute(&self, name: &str) -> DrmResult<()> {
        if self.rejected_attributes.iter().any(|n| n == name) {
            return Err(DrmError::InvalidAttributeValue {
                name: name.to_string(),
                message: "rejected by mock".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Drm for MockDrm {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self, contact: &str) -> DrmResult<()> {
        self.with(|s| {
            if s.reject_contact {
                return Err(DrmError::UnsupportedContact(contact.to_string()));
            }
            s.connected = true;
            Ok(())
        })
    }

    async fn disconnect(&self) -> DrmResult<()> {
        self.with(|s| {
            s.connected = false;
            if s.fail_disconnect {
                return Err(DrmError::ConnectionLost("disconnect failed".to_string()));
            }
            Ok(())
        })
    }

    async fn allocate_template(&self) -> DrmResult<TemplateHandle> {
        self.with(|s| {
            s.ensure_connected()?;
            let handle = TemplateHandle(s.next_handle);
            s.next_handle += 1;
            s.templates.insert(handle, FxHashMap::default());
            Ok(handle)
        })
    }

    async fn release_template(&self, handle: TemplateHandle) -> DrmResult<()> {
        self.with(|s| {
            s.ensure_connected()?;
            s.templates
                .remove(&handle)
                .ok_or(DrmError::InvalidTemplate(handle))?;
            s.released += 1;
            Ok(())
        })
    }

    async fn set_attribute(&self, handle: TemplateHandle, name: &str, value: &str) -> DrmResult<()> {
        self.with(|s| {
            s.ensure_connected()?;
            s.check_attribute(name)?;
            s.template(handle)?.insert(name.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn unset_attribute(&self, handle: TemplateHandle, name: &str) -> DrmResult<()> {
        self.with(|s| {
            s.ensure_connected()?;
            s.template(handle)?.remove(name);
            Ok(())
        })
    }

    async fn set_vector_attribute(
        &self,
        handle: TemplateHandle,
        name: &str,
        values: &[String],
    ) -> DrmResult<()> {
        self.with(|s| {
            s.ensure_connected()?;
            s.check_attribute(name)?;
            s.template(handle)?.insert(name.to_string(), values.join(" "));
            Ok(())
        })
    }

    async fn submit(&self, handle: TemplateHandle) -> DrmResult<JobId> {
        self.with(|s| {
            s.ensure_connected()?;
            if s.submit_capacity.is_some_and(|cap| s.submitted >= cap) {
                return Err(DrmError::SubmissionRejected(
                    "submit capacity reached".to_string(),
                ));
            }
            s.submitted += 1;
            let job_id = JobId::new(format!("{}.mock.{}", s.submitted, handle));
            s.jobs.insert(
                job_id.clone(),
                ScriptedJob {
                    states: VecDeque::from([RawJobState::QUEUED_ACTIVE]),
                    exit: RawWaitStatus::exited(0),
                    queries: 0,
                    controls: Vec::new(),
                },
            );
            Ok(job_id)
        })
    }

    async fn submit_bulk(&self, handle: TemplateHandle, count: u32) -> DrmResult<BulkSubmission> {
        let surplus = self.with(|s| s.bulk_surplus);
        let mut job_ids = Vec::new();
        for _ in 0..count + surplus {
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

    async fn control(&self, job_id: &JobId, action: Action) -> DrmResult<()> {
        self.with(|s| {
            s.ensure_connected()?;
            let job = s
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))?;
            let current = job.current();
            let (next, message) = match action {
                Action::Suspend => (
                    (current == RawJobState::RUNNING).then_some(RawJobState::USER_SUSPENDED),
                    "job is not running",
                ),
                Action::Resume => (
                    (current == RawJobState::USER_SUSPENDED).then_some(RawJobState::RUNNING),
                    "job is not suspended",
                ),
                Action::Hold => (
                    (current == RawJobState::QUEUED_ACTIVE).then_some(RawJobState::USER_ON_HOLD),
                    "job is not queued",
                ),
                Action::Release => (
                    (current == RawJobState::USER_ON_HOLD).then_some(RawJobState::QUEUED_ACTIVE),
                    "job is not held",
                ),
                Action::Terminate => (
                    (!current.is_terminal()).then_some(RawJobState::FAILED),
                    "job has finished",
                ),
            };
            let next = next.ok_or_else(|| DrmError::InvalidTransition {
                job_id: job_id.to_string(),
                action,
                message: message.to_string(),
            })?;
            if action == Action::Terminate {
                job.exit = RawWaitStatus::signaled(9);
            }
            job.set(next);
            job.controls.push(action);
            Ok(())
        })
    }

    async fn query_status(&self, job_id: &JobId) -> DrmResult<RawJobState> {
        self.with(|s| {
            s.ensure_connected()?;
            if s.failing_queries > 0 {
                s.failing_queries -= 1;
                return Err(DrmError::ConnectionLost("scripted failure".to_string()));
            }
            s.jobs
                .get_mut(job_id)
                .map(ScriptedJob::advance)
                .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))
        })
    }

    async fn wait(&self, job_id: &JobId, _timeout: Duration) -> DrmResult<RawExit> {
        self.with(|s| {
            s.ensure_connected()?;
            let job = s
                .jobs
                .get(job_id)
                .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))?;
            if job.current().is_terminal() {
                Ok(RawExit::new(job.exit).with_usage("mock_controls", job.controls.len().to_string()))
            } else {
                Err(DrmError::ExitTimeout(job_id.to_string()))
            }
        })
    }
}
