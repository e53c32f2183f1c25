//! Local process DRM implementation.

use std::fs::File;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use rustc_hash::FxHashMap;
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use drmjobs_drm::{
    Action, BulkSubmission, Drm, DrmError, DrmResult, JobId, RawExit, RawJobState, RawWaitStatus,
    TemplateHandle,
};

use crate::spec::{JobSpec, LocalTemplate};

/// Contact scheme served by this DRM.
pub const SCHEME: &str = "local";

/// Configuration for the local DRM.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Number of job slots; a job occupies as many slots as it requests cpus.
    pub slots: usize,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            slots: std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

impl LocalConfig {
    /// Create a configuration with a fixed slot count.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            slots: slots.max(1),
        }
    }
}

#[derive(Debug)]
enum LocalState {
    Queued {
        held: bool,
    },
    Running {
        pid: i32,
        suspended: bool,
        started: Instant,
        terminated: bool,
    },
    Finished {
        exit: RawExit,
        failed: bool,
    },
}

#[derive(Debug)]
struct LocalJob {
    spec: JobSpec,
    seq: u64,
    state: LocalState,
}

impl LocalJob {
    fn raw_state(&self) -> RawJobState {
        match self.state {
            LocalState::Queued { held: false } => RawJobState::QUEUED_ACTIVE,
            LocalState::Queued { held: true } => RawJobState::USER_ON_HOLD,
            LocalState::Running {
                suspended: false, ..
            } => RawJobState::RUNNING,
            LocalState::Running {
                suspended: true, ..
            } => RawJobState::USER_SUSPENDED,
            LocalState::Finished { failed: false, .. } => RawJobState::DONE,
            LocalState::Finished { failed: true, .. } => RawJobState::FAILED,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    contact: Option<String>,
    slots: usize,
    busy_slots: usize,
    next_handle: u64,
    templates: FxHashMap<TemplateHandle, LocalTemplate>,
    next_job: u64,
    jobs: FxHashMap<JobId, LocalJob>,
}

impl Inner {
    fn ensure_connected(&self) -> DrmResult<()> {
        if self.contact.is_some() {
            Ok(())
        } else {
            Err(DrmError::NotConnected)
        }
    }

    fn template(&mut self, handle: TemplateHandle) -> DrmResult<&mut LocalTemplate> {
        self.templates
            .get_mut(&handle)
            .ok_or(DrmError::InvalidTemplate(handle))
    }

    fn job_mut(&mut self, job_id: &JobId) -> DrmResult<&mut LocalJob> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))
    }

    /// Next runnable job: highest priority first, then submission order.
    fn next_runnable(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .filter(|(_, job)| matches!(job.state, LocalState::Queued { held: false }))
            .max_by(|(_, a), (_, b)| {
                a.spec
                    .priority
                    .cmp(&b.spec.priority)
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(id, _)| id.clone())
    }

    fn enqueue(&mut self, spec: JobSpec) -> JobId {
        self.next_job += 1;
        let job_id = JobId::new(format!("{}.{}", self.next_job, SCHEME));
        let state = LocalState::Queued { held: spec.hold };
        self.jobs.insert(
            job_id.clone(),
            LocalJob {
                spec,
                seq: self.next_job,
                state,
            },
        );
        job_id
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A DRM that runs jobs as child processes of the current process.
///
/// Jobs wait in a priority queue until enough slots are free. Each running
/// job is the leader of its own process group, so suspend, resume and
/// terminate reach everything the job started.
pub struct LocalDrm {
    config: LocalConfig,
    shared: Arc<Shared>,
}

impl LocalDrm {
    /// Create a local DRM with default settings.
    pub fn new() -> Self {
        Self::with_config(LocalConfig::default())
    }

    /// Create a local DRM with a custom configuration.
    pub fn with_config(config: LocalConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Factory for [`drmjobs_drm::DrmRegistry`]; the contact is checked on `connect`.
    pub fn factory(_contact: &str) -> DrmResult<Arc<dyn Drm>> {
        Ok(Arc::new(Self::new()))
    }

    fn parse_contact(&self, contact: &str) -> DrmResult<usize> {
        match contact.trim() {
            "" | SCHEME => Ok(self.config.slots.max(1)),
            other => other
                .strip_prefix("local:")
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| DrmError::UnsupportedContact(contact.to_string())),
        }
    }

    fn submit_one(&self, handle: TemplateHandle, index: u32) -> DrmResult<JobId> {
        let job_id = {
            let mut inner = self.shared.lock();
            inner.ensure_connected()?;
            let slots = inner.slots;
            let template = inner.template(handle)?;
            let spec = JobSpec::from_template(template, index, slots)
                .map_err(|e| DrmError::SubmissionRejected(e.to_string()))?;
            debug!(
                "Queued {} ({}) priority {} cpus {}",
                spec.command,
                spec.name.as_deref().unwrap_or("unnamed"),
                spec.priority,
                spec.cpus
            );
            inner.enqueue(spec)
        };
        schedule(&self.shared);
        Ok(job_id)
    }
}

impl Default for LocalDrm {
    fn default() -> Self {
        Self::new()
    }
}

/// Start queued jobs while slots allow.
fn schedule(shared: &Arc<Shared>) {
    let mut inner = shared.lock();
    if inner.contact.is_none() {
        return;
    }
    while let Some(job_id) = inner.next_runnable() {
        let Some(job) = inner.jobs.get(&job_id) else {
            break;
        };
        let cpus = job.spec.cpus;
        if inner.busy_slots + cpus > inner.slots {
            break;
        }

        match start(shared, &job_id, &job.spec) {
            Ok(pid) => {
                inner.busy_slots += cpus;
                if let Some(job) = inner.jobs.get_mut(&job_id) {
                    job.state = LocalState::Running {
                        pid,
                        suspended: false,
                        started: Instant::now(),
                        terminated: false,
                    };
                }
                info!("Started job {} (pid {})", job_id, pid);
            }
            Err(e) => {
                warn!("Job {} could not be started: {}", job_id, e);
                if let Some(job) = inner.jobs.get_mut(&job_id) {
                    job.state = LocalState::Finished {
                        exit: RawExit::new(RawWaitStatus::ABORTED),
                        failed: true,
                    };
                }
            }
        }
    }
    drop(inner);
    shared.changed.notify_waiters();
}

/// Spawn the job's process and a task that reaps it.
fn start(shared: &Arc<Shared>, job_id: &JobId, spec: &JobSpec) -> std::io::Result<i32> {
    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .envs(spec.env.iter().map(|(k, v)| (k, v)))
        .process_group(0)
        .kill_on_drop(true);
    if let Some(wd) = &spec.working_dir {
        command.current_dir(wd);
    }

    command.stdin(match &spec.stdin {
        Some(path) => Stdio::from(File::open(path)?),
        None => Stdio::null(),
    });
    let stdout = spec.stdout.as_ref().map(File::create).transpose()?;
    match (&stdout, spec.join_files, &spec.stderr) {
        (Some(out), true, _) => {
            command.stderr(Stdio::from(out.try_clone()?));
        }
        (_, _, Some(path)) => {
            command.stderr(Stdio::from(File::create(path)?));
        }
        _ => {
            command.stderr(Stdio::null());
        }
    }
    command.stdout(stdout.map_or_else(Stdio::null, Stdio::from));

    let mut child = command.spawn()?;
    let pid = child
        .id()
        .and_then(|pid| i32::try_from(pid).ok())
        .ok_or_else(|| std::io::Error::other("spawned process has no pid"))?;

    let shared = shared.clone();
    let job_id = job_id.clone();
    let limit = spec.wall_clock_limit;
    tokio::spawn(async move {
        let status = match limit {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!("Job {} exceeded its wall clock limit of {:?}", job_id, limit);
                    signal_group(pid, Signal::SIGKILL);
                    child.wait().await
                }
            },
            None => child.wait().await,
        };
        finish(&shared, &job_id, status);
    });

    Ok(pid)
}

/// Record a reaped process and start whatever can run next.
fn finish(shared: &Arc<Shared>, job_id: &JobId, status: std::io::Result<ExitStatus>) {
    {
        let mut inner = shared.lock();
        let Some(job) = inner.jobs.get_mut(job_id) else {
            return;
        };
        let LocalState::Running {
            started,
            terminated,
            ..
        } = job.state
        else {
            return;
        };
        let cpus = job.spec.cpus;

        let (raw, failed) = match status {
            Ok(status) => {
                use std::os::unix::process::ExitStatusExt;
                (RawWaitStatus(status.into_raw()), status.code().is_none())
            }
            Err(e) => {
                warn!("Lost track of job {}: {}", job_id, e);
                (RawWaitStatus(-3), true)
            }
        };
        let exit = RawExit::new(raw)
            .with_usage("wallclock", format!("{:.3}", started.elapsed().as_secs_f64()))
            .with_usage("cpus", cpus.to_string());
        info!(
            "Job {} finished (wait status {}{})",
            job_id,
            raw,
            if terminated { ", terminated" } else { "" }
        );
        job.state = LocalState::Finished { exit, failed };
        inner.busy_slots = inner.busy_slots.saturating_sub(cpus);
    }
    schedule(shared);
}

fn signal_group(pid: i32, signal: Signal) -> bool {
    match killpg(Pid::from_raw(pid), signal) {
        Ok(()) => true,
        Err(e) => {
            debug!("Sending {} to process group {} failed: {}", signal, pid, e);
            false
        }
    }
}

#[async_trait]
impl Drm for LocalDrm {
    fn name(&self) -> &str {
        SCHEME
    }

    // Disconnect kills running jobs and aborts queued ones.
    fn jobs_outlive_session(&self) -> bool {
        false
    }

    async fn connect(&self, contact: &str) -> DrmResult<()> {
        let slots = self.parse_contact(contact)?;
        let mut inner = self.shared.lock();
        if let Some(current) = &inner.contact {
            return Err(DrmError::AlreadyConnected(current.clone()));
        }
        inner.contact = Some(contact.to_string());
        inner.slots = slots;
        info!("Local DRM ready with {} slot(s)", slots);
        Ok(())
    }

    async fn disconnect(&self) -> DrmResult<()> {
        {
            let mut inner = self.shared.lock();
            inner.ensure_connected()?;
            inner.contact = None;
            for (job_id, job) in inner.jobs.iter_mut() {
                match job.state {
                    LocalState::Queued { .. } => {
                        job.state = LocalState::Finished {
                            exit: RawExit::new(RawWaitStatus::ABORTED),
                            failed: true,
                        };
                    }
                    LocalState::Running {
                        pid,
                        ref mut terminated,
                        ..
                    } => {
                        debug!("Killing job {} on disconnect", job_id);
                        *terminated = signal_group(pid, Signal::SIGKILL);
                    }
                    LocalState::Finished { .. } => {}
                }
            }
            inner.templates.clear();
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn allocate_template(&self) -> DrmResult<TemplateHandle> {
        let mut inner = self.shared.lock();
        inner.ensure_connected()?;
        let handle = TemplateHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.templates.insert(handle, LocalTemplate::default());
        Ok(handle)
    }

    async fn release_template(&self, handle: TemplateHandle) -> DrmResult<()> {
        let mut inner = self.shared.lock();
        inner.ensure_connected()?;
        inner
            .templates
            .remove(&handle)
            .map(|_| ())
            .ok_or(DrmError::InvalidTemplate(handle))
    }

    async fn set_attribute(&self, handle: TemplateHandle, name: &str, value: &str) -> DrmResult<()> {
        let mut inner = self.shared.lock();
        inner.ensure_connected()?;
        inner
            .template(handle)?
            .scalars
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn unset_attribute(&self, handle: TemplateHandle, name: &str) -> DrmResult<()> {
        let mut inner = self.shared.lock();
        inner.ensure_connected()?;
        inner.template(handle)?.scalars.remove(name);
        Ok(())
    }

    async fn set_vector_attribute(
        &self,
        handle: TemplateHandle,
        name: &str,
        values: &[String],
    ) -> DrmResult<()> {
        let mut inner = self.shared.lock();
        inner.ensure_connected()?;
        inner
            .template(handle)?
            .vectors
            .insert(name.to_string(), values.to_vec());
        Ok(())
    }

    async fn submit(&self, handle: TemplateHandle) -> DrmResult<JobId> {
        self.submit_one(handle, 0)
    }

    async fn submit_bulk(&self, handle: TemplateHandle, count: u32) -> DrmResult<BulkSubmission> {
        let mut job_ids = Vec::with_capacity(count as usize);
        for index in 0..count {
            match self.submit_one(handle, index) {
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
        let invalid = |message: &str| DrmError::InvalidTransition {
            job_id: job_id.to_string(),
            action,
            message: message.to_string(),
        };

        let reschedule = {
            let mut inner = self.shared.lock();
            inner.ensure_connected()?;
            let job = inner.job_mut(job_id)?;
            match action {
                Action::Suspend => match &mut job.state {
                    LocalState::Running { pid, suspended, .. } if !*suspended => {
                        if !signal_group(*pid, Signal::SIGSTOP) {
                            return Err(invalid("job is exiting"));
                        }
                        *suspended = true;
                        false
                    }
                    _ => return Err(invalid("job is not running")),
                },
                Action::Resume => match &mut job.state {
                    LocalState::Running { pid, suspended, .. } if *suspended => {
                        if !signal_group(*pid, Signal::SIGCONT) {
                            return Err(invalid("job is exiting"));
                        }
                        *suspended = false;
                        false
                    }
                    _ => return Err(invalid("job is not suspended")),
                },
                Action::Hold => match &mut job.state {
                    LocalState::Queued { held } if !*held => {
                        *held = true;
                        false
                    }
                    _ => return Err(invalid("job is not queued")),
                },
                Action::Release => match &mut job.state {
                    LocalState::Queued { held } if *held => {
                        *held = false;
                        true
                    }
                    _ => return Err(invalid("job is not on hold")),
                },
                Action::Terminate if matches!(job.state, LocalState::Queued { .. }) => {
                    job.state = LocalState::Finished {
                        exit: RawExit::new(RawWaitStatus::ABORTED),
                        failed: true,
                    };
                    false
                }
                Action::Terminate => match &mut job.state {
                    LocalState::Running {
                        pid,
                        suspended,
                        terminated,
                        ..
                    } => {
                        signal_group(*pid, Signal::SIGKILL);
                        if *suspended {
                            signal_group(*pid, Signal::SIGCONT);
                        }
                        *terminated = true;
                        false
                    }
                    _ => return Err(invalid("job has already finished")),
                },
            }
        };

        debug!("Applied {} to job {}", action, job_id);
        if reschedule {
            schedule(&self.shared);
        } else {
            self.shared.changed.notify_waiters();
        }
        Ok(())
    }

    async fn query_status(&self, job_id: &JobId) -> DrmResult<RawJobState> {
        let inner = self.shared.lock();
        inner.ensure_connected()?;
        inner
            .jobs
            .get(job_id)
            .map(LocalJob::raw_state)
            .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))
    }

    async fn wait(&self, job_id: &JobId, timeout: Duration) -> DrmResult<RawExit> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut notified = std::pin::pin!(self.shared.changed.notified());
            notified.as_mut().enable();

            {
                let inner = self.shared.lock();
                let job = inner
                    .jobs
                    .get(job_id)
                    .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))?;
                if let LocalState::Finished { exit, .. } = &job.state {
                    return Ok(exit.clone());
                }
                inner.ensure_connected()?;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(DrmError::ExitTimeout(job_id.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_parsing() {
        let drm = LocalDrm::with_config(LocalConfig::with_slots(3));
        assert_eq!(drm.parse_contact("local").unwrap(), 3);
        assert_eq!(drm.parse_contact("").unwrap(), 3);
        assert_eq!(drm.parse_contact("local:8").unwrap(), 8);
        assert!(drm.parse_contact("local:0").is_err());
        assert!(drm.parse_contact("local:many").is_err());
        assert!(drm.parse_contact("slurm").is_err());
    }

    #[test]
    fn test_queue_order() {
        let mut inner = Inner::default();
        let spec = |priority| JobSpec {
            command: "/bin/true".to_string(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            join_files: false,
            hold: false,
            wall_clock_limit: None,
            priority,
            cpus: 1,
            name: None,
        };
        let low = inner.enqueue(spec(0));
        let first_high = inner.enqueue(spec(5));
        let second_high = inner.enqueue(spec(5));

        assert_eq!(inner.next_runnable(), Some(first_high.clone()));
        inner.jobs.get_mut(&first_high).unwrap().state = LocalState::Queued { held: true };
        assert_eq!(inner.next_runnable(), Some(second_high.clone()));
        inner.jobs.remove(&second_high);
        assert_eq!(inner.next_runnable(), Some(low));
        assert_eq!(first_high.as_str(), "2.local");
    }
}
