//! SLURM DRM: job submission and tracking through the SLURM command-line tools.

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use drmjobs_drm::{
    Action, BulkSubmission, Drm, DrmError, DrmResult, JobId, RawExit, RawJobState, TemplateHandle,
};

use crate::parser::{self, ControlFailure, SlurmJobInfo, SlurmState};
use crate::templates::{self, SlurmTemplate};

/// Contact scheme served by this DRM.
pub const SCHEME: &str = "slurm";

/// Configuration for the SLURM DRM.
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// Partition to submit to; `slurm:<partition>` overrides it.
    pub partition: Option<String>,

    /// Account for billing.
    pub account: Option<String>,

    /// Directory holding the SLURM binaries; `None` searches `PATH`.
    pub bin_dir: Option<PathBuf>,

    /// Interval between sacct polls while reaping.
    pub poll_interval: Duration,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            partition: None,
            account: None,
            bin_dir: None,
            poll_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    contact: Option<String>,
    partition: Option<String>,
    next_handle: u64,
    templates: FxHashMap<TemplateHandle, SlurmTemplate>,
}

/// In-memory job table used in mock mode.
#[derive(Debug, Default)]
struct MockCluster {
    jobs: FxHashMap<String, SlurmJobInfo>,
    submissions: Vec<Vec<String>>,
}

impl MockCluster {
    fn add(&mut self, job_id: String, hold: bool) {
        let (state, reason, started) = if hold {
            (SlurmState::Pending, Some("JobHeldUser".to_string()), false)
        } else {
            (SlurmState::Completed, None, true)
        };
        self.jobs.insert(
            job_id.clone(),
            SlurmJobInfo {
                job_id,
                name: "mock_job".to_string(),
                state,
                reason,
                exit_code: started.then_some(0),
                signal: started.then_some(0),
                started,
                elapsed: started.then(|| "00:00:00".to_string()),
            },
        );
    }
}

/// A DRM backed by a SLURM cluster.
///
/// Templates live in memory; each submission runs `sbatch --wrap`. Bulk
/// submissions become one array job whose tasks are reported as
/// `<id>_<index>`.
pub struct SlurmDrm {
    config: SlurmConfig,
    inner: Mutex<Inner>,
    /// Whether to use mock mode (for testing).
    mock_mode: bool,
    /// Mock job counter for generating fake job IDs.
    mock_counter: AtomicU64,
    mock_cluster: Mutex<MockCluster>,
}

impl SlurmDrm {
    /// Create a SLURM DRM with the given configuration.
    pub fn new(config: SlurmConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            mock_mode: false,
            mock_counter: AtomicU64::new(1000),
            mock_cluster: Mutex::new(MockCluster::default()),
        }
    }

    /// Create a SLURM DRM in mock mode: no command is run, jobs complete
    /// immediately unless submitted on hold.
    pub fn mock(config: SlurmConfig) -> Self {
        Self {
            mock_mode: true,
            ..Self::new(config)
        }
    }

    /// Factory for [`drmjobs_drm::DrmRegistry`].
    pub fn factory(_contact: &str) -> DrmResult<Arc<dyn Drm>> {
        Ok(Arc::new(Self::new(SlurmConfig::default())))
    }

    /// sbatch argument lists submitted so far in mock mode.
    pub fn mock_submissions(&self) -> Vec<Vec<String>> {
        self.cluster().submissions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cluster(&self) -> MutexGuard<'_, MockCluster> {
        self.mock_cluster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> DrmResult<()> {
        if self.lock().contact.is_some() {
            Ok(())
        } else {
            Err(DrmError::NotConnected)
        }
    }

    fn parse_contact(contact: &str) -> DrmResult<Option<String>> {
        match contact.trim() {
            SCHEME => Ok(None),
            other => other
                .strip_prefix("slurm:")
                .filter(|p| !p.is_empty())
                .map(|p| Some(p.to_string()))
                .ok_or_else(|| DrmError::UnsupportedContact(contact.to_string())),
        }
    }

    fn binary(&self, name: &str) -> PathBuf {
        match &self.config.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Run a SLURM command and capture its output.
    async fn run(&self, name: &str, args: &[String]) -> DrmResult<Output> {
        debug!("Running {} {}", name, args.join(" "));
        Command::new(self.binary(name))
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DrmError::Command {
                command: name.to_string(),
                message: e.to_string(),
            })
    }

    async fn submit_template(&self, handle: TemplateHandle, array: Option<u32>) -> DrmResult<String> {
        let (args, hold) = {
            let inner = self.lock();
            if inner.contact.is_none() {
                return Err(DrmError::NotConnected);
            }
            let template = inner
                .templates
                .get(&handle)
                .ok_or(DrmError::InvalidTemplate(handle))?;
            let config = SlurmConfig {
                partition: inner
                    .partition
                    .clone()
                    .or_else(|| self.config.partition.clone()),
                ..self.config.clone()
            };
            let args = templates::sbatch_args(template, &config, array)
                .map_err(DrmError::SubmissionRejected)?;
            let hold = args.iter().any(|a| a == "--hold");
            (args, hold)
        };

        if self.mock_mode {
            let job_id = self.mock_counter.fetch_add(1, Ordering::SeqCst).to_string();
            let mut cluster = self.cluster();
            match array {
                Some(count) => {
                    for index in 0..count {
                        cluster.add(format!("{}_{}", job_id, index), hold);
                    }
                }
                None => cluster.add(job_id.clone(), hold),
            }
            cluster.submissions.push(args);
            return Ok(job_id);
        }

        let output = self.run("sbatch", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DrmError::SubmissionRejected(stderr.trim().to_string()));
        }
        let job_id = parser::parse_sbatch_output(&String::from_utf8_lossy(&output.stdout))?;
        info!("sbatch accepted job {}", job_id);
        Ok(job_id)
    }

    /// Look a job up in squeue, then in sacct.
    async fn job_info(&self, job_id: &JobId) -> DrmResult<SlurmJobInfo> {
        self.ensure_connected()?;
        if self.mock_mode {
            return self
                .cluster()
                .jobs
                .get(job_id.as_str())
                .cloned()
                .ok_or_else(|| DrmError::InvalidJob(job_id.to_string()));
        }

        let args = ["-j", job_id.as_str(), "-o", "%i|%j|%T|%r|%S"].map(str::to_string);
        if let Some(stdout) = self.query("squeue", &args).await? {
            if let Some(info) = parser::parse_squeue_output(&stdout)? {
                return Ok(info);
            }
        }

        let args = [
            "-j",
            job_id.as_str(),
            "-o",
            "JobID,JobName,State,ExitCode,Start,Elapsed",
            "-P",
        ]
        .map(str::to_string);
        let stdout = self.query("sacct", &args).await?.unwrap_or_default();
        parser::parse_sacct_output(&stdout)?.ok_or_else(|| DrmError::InvalidJob(job_id.to_string()))
    }

    /// Run a query command. `None` means SLURM does not know the job; any
    /// other failure means the controller or database could not answer.
    async fn query(&self, name: &str, args: &[String]) -> DrmResult<Option<String>> {
        let output = self.run(name, args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
        }
        if parser::is_unknown_job(&stderr) {
            return Ok(None);
        }
        let message = parser::error_message(&stderr)
            .unwrap_or_else(|| format!("exited with {}", output.status));
        warn!("{} failed: {}", name, message);
        Err(DrmError::ConnectionLost(format!("{}: {}", name, message)))
    }

    fn mock_control(&self, job_id: &JobId, action: Action) -> Result<(), ControlFailure> {
        let mut cluster = self.cluster();
        let job = cluster
            .jobs
            .get_mut(job_id.as_str())
            .ok_or(ControlFailure::UnknownJob)?;
        let refused = |message: &str| Err(ControlFailure::Refused(message.to_string()));
        match (action, job.state.clone()) {
            (Action::Suspend, SlurmState::Running) => job.state = SlurmState::Suspended,
            (Action::Resume, SlurmState::Suspended) => job.state = SlurmState::Running,
            (Action::Hold, SlurmState::Pending) => job.reason = Some("JobHeldUser".to_string()),
            (Action::Release, SlurmState::Pending) => {
                job.state = SlurmState::Completed;
                job.reason = None;
                job.started = true;
                job.exit_code = Some(0);
                job.signal = Some(0);
            }
            (Action::Terminate, state) if !state.is_terminal() => {
                job.state = SlurmState::Cancelled;
                job.reason = None;
                job.exit_code = Some(0);
                job.signal = job.started.then_some(9);
            }
            (Action::Suspend | Action::Resume, _) => return refused("Job is not running"),
            (Action::Hold | Action::Release, _) => {
                return refused("Job is no longer pending execution");
            }
            (Action::Terminate, _) => return refused("Job has already finished"),
        }
        Ok(())
    }
}

#[async_trait]
impl Drm for SlurmDrm {
    fn name(&self) -> &str {
        SCHEME
    }

    async fn connect(&self, contact: &str) -> DrmResult<()> {
        let partition = Self::parse_contact(contact)?;
        let current = self.lock().contact.clone();
        if let Some(current) = current {
            return Err(DrmError::AlreadyConnected(current));
        }

        if !self.mock_mode {
            let output = self.run("squeue", &["--version".to_string()]).await?;
            if !output.status.success() {
                return Err(DrmError::ConnectionLost(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ));
            }
            debug!(
                "Found {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }

        let mut inner = self.lock();
        inner.contact = Some(contact.to_string());
        inner.partition = partition;
        info!(
            "SLURM DRM connected (partition {})",
            inner.partition.as_deref().unwrap_or("default")
        );
        Ok(())
    }

    async fn disconnect(&self) -> DrmResult<()> {
        let mut inner = self.lock();
        if inner.contact.take().is_none() {
            return Err(DrmError::NotConnected);
        }
        inner.partition = None;
        inner.templates.clear();
        Ok(())
    }

    async fn allocate_template(&self) -> DrmResult<TemplateHandle> {
        let mut inner = self.lock();
        if inner.contact.is_none() {
            return Err(DrmError::NotConnected);
        }
        let handle = TemplateHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.templates.insert(handle, SlurmTemplate::default());
        Ok(handle)
    }

    async fn release_template(&self, handle: TemplateHandle) -> DrmResult<()> {
        let mut inner = self.lock();
        if inner.contact.is_none() {
            return Err(DrmError::NotConnected);
        }
        inner
            .templates
            .remove(&handle)
            .map(|_| ())
            .ok_or(DrmError::InvalidTemplate(handle))
    }

    async fn set_attribute(&self, handle: TemplateHandle, name: &str, value: &str) -> DrmResult<()> {
        let mut inner = self.lock();
        if inner.contact.is_none() {
            return Err(DrmError::NotConnected);
        }
        inner
            .templates
            .get_mut(&handle)
            .ok_or(DrmError::InvalidTemplate(handle))?
            .scalars
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn unset_attribute(&self, handle: TemplateHandle, name: &str) -> DrmResult<()> {
        let mut inner = self.lock();
        if inner.contact.is_none() {
            return Err(DrmError::NotConnected);
        }
        inner
            .templates
            .get_mut(&handle)
            .ok_or(DrmError::InvalidTemplate(handle))?
            .scalars
            .remove(name);
        Ok(())
    }

    async fn set_vector_attribute(
        &self,
        handle: TemplateHandle,
        name: &str,
        values: &[String],
    ) -> DrmResult<()> {
        let mut inner = self.lock();
        if inner.contact.is_none() {
            return Err(DrmError::NotConnected);
        }
        inner
            .templates
            .get_mut(&handle)
            .ok_or(DrmError::InvalidTemplate(handle))?
            .vectors
            .insert(name.to_string(), values.to_vec());
        Ok(())
    }

    async fn submit(&self, handle: TemplateHandle) -> DrmResult<JobId> {
        self.submit_template(handle, None).await.map(JobId::new)
    }

    async fn submit_bulk(&self, handle: TemplateHandle, count: u32) -> DrmResult<BulkSubmission> {
        let array_id = self.submit_template(handle, Some(count)).await?;
        let job_ids = (0..count)
            .map(|index| JobId::new(format!("{}_{}", array_id, index)))
            .collect();
        Ok(BulkSubmission::complete(job_ids))
    }

    async fn control(&self, job_id: &JobId, action: Action) -> DrmResult<()> {
        self.ensure_connected()?;
        let failure = if self.mock_mode {
            self.mock_control(job_id, action).err()
        } else {
            let (command, mut args) = match action {
                Action::Suspend => ("scontrol", vec!["suspend".to_string()]),
                Action::Resume => ("scontrol", vec!["resume".to_string()]),
                Action::Hold => ("scontrol", vec!["hold".to_string()]),
                Action::Release => ("scontrol", vec!["release".to_string()]),
                Action::Terminate => ("scancel", Vec::new()),
            };
            args.push(job_id.to_string());
            let output = self.run(command, &args).await?;
            parser::parse_control_output(
                output.status.success(),
                &String::from_utf8_lossy(&output.stderr),
            )
        };

        match failure {
            None => {
                debug!("Applied {} to SLURM job {}", action, job_id);
                Ok(())
            }
            Some(ControlFailure::UnknownJob) => Err(DrmError::InvalidJob(job_id.to_string())),
            Some(ControlFailure::Unreachable(message)) => Err(DrmError::ConnectionLost(message)),
            Some(ControlFailure::Refused(message)) => Err(DrmError::InvalidTransition {
                job_id: job_id.to_string(),
                action,
                message,
            }),
        }
    }

    async fn query_status(&self, job_id: &JobId) -> DrmResult<RawJobState> {
        Ok(self.job_info(job_id).await?.raw_state())
    }

    async fn wait(&self, job_id: &JobId, timeout: Duration) -> DrmResult<RawExit> {
        let deadline = Instant::now() + timeout;
        loop {
            let info = self.job_info(job_id).await?;
            if info.state.is_terminal() {
                let mut exit = RawExit::new(info.wait_status());
                if let Some(elapsed) = info.elapsed {
                    exit = exit.with_usage("elapsed", elapsed);
                }
                return Ok(exit);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DrmError::ExitTimeout(job_id.to_string()));
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drmjobs_drm::{RawWaitStatus, attr};

    async fn connected() -> SlurmDrm {
        let drm = SlurmDrm::mock(SlurmConfig::default());
        drm.connect("slurm:debug").await.unwrap();
        drm
    }

    async fn echo(drm: &SlurmDrm) -> TemplateHandle {
        let handle = drm.allocate_template().await.unwrap();
        drm.set_attribute(handle, attr::REMOTE_COMMAND, "/bin/echo")
            .await
            .unwrap();
        drm.set_vector_attribute(handle, attr::V_ARGV, &["hi".to_string()])
            .await
            .unwrap();
        handle
    }

    #[test]
    fn test_contact_parsing() {
        assert_eq!(SlurmDrm::parse_contact("slurm").unwrap(), None);
        assert_eq!(
            SlurmDrm::parse_contact("slurm:gpu").unwrap(),
            Some("gpu".to_string())
        );
        assert!(SlurmDrm::parse_contact("slurm:").is_err());
        assert!(SlurmDrm::parse_contact("local").is_err());
    }

    #[tokio::test]
    async fn test_mock_submit_and_reap() {
        let drm = connected().await;
        let handle = echo(&drm).await;

        let job_id = drm.submit(handle).await.unwrap();
        assert_eq!(job_id.as_str(), "1000");
        assert_eq!(drm.query_status(&job_id).await.unwrap(), RawJobState::DONE);
        let exit = drm.wait(&job_id, Duration::ZERO).await.unwrap();
        assert_eq!(exit.status, RawWaitStatus::exited(0));

        let submitted = drm.mock_submissions();
        assert_eq!(submitted.len(), 1);
        assert!(submitted[0].contains(&"--partition=debug".to_string()));
        assert_eq!(submitted[0].last().unwrap(), "--wrap='/bin/echo' 'hi'");
    }

    #[tokio::test]
    async fn test_mock_array_job() {
        let drm = connected().await;
        let handle = echo(&drm).await;

        let bulk = drm.submit_bulk(handle, 3).await.unwrap();
        let ids: Vec<&str> = bulk.job_ids.iter().map(JobId::as_str).collect();
        assert_eq!(ids, vec!["1000_0", "1000_1", "1000_2"]);
        assert!(drm.mock_submissions()[0].contains(&"--array=0-2".to_string()));
        for job_id in &bulk.job_ids {
            assert_eq!(drm.query_status(job_id).await.unwrap(), RawJobState::DONE);
        }
    }

    #[tokio::test]
    async fn test_mock_hold_release_cancel() {
        let drm = connected().await;
        let handle = echo(&drm).await;
        drm.set_attribute(handle, attr::JS_STATE, attr::JS_STATE_HOLD)
            .await
            .unwrap();

        let held = drm.submit(handle).await.unwrap();
        let cancelled = drm.submit(handle).await.unwrap();
        assert_eq!(
            drm.query_status(&held).await.unwrap(),
            RawJobState::USER_ON_HOLD
        );
        assert!(matches!(
            drm.wait(&held, Duration::ZERO).await,
            Err(DrmError::ExitTimeout(_))
        ));
        assert!(matches!(
            drm.control(&held, Action::Suspend).await,
            Err(DrmError::InvalidTransition { .. })
        ));

        drm.control(&held, Action::Release).await.unwrap();
        assert_eq!(drm.query_status(&held).await.unwrap(), RawJobState::DONE);

        drm.control(&cancelled, Action::Terminate).await.unwrap();
        assert_eq!(
            drm.query_status(&cancelled).await.unwrap(),
            RawJobState::FAILED
        );
        let exit = drm.wait(&cancelled, Duration::ZERO).await.unwrap();
        assert_eq!(exit.status, RawWaitStatus::ABORTED);

        assert!(matches!(
            drm.control(&JobId::new("42"), Action::Hold).await,
            Err(DrmError::InvalidJob(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_template() {
        let drm = connected().await;
        let handle = drm.allocate_template().await.unwrap();
        assert!(matches!(
            drm.submit(handle).await,
            Err(DrmError::SubmissionRejected(_))
        ));
        assert!(matches!(
            drm.submit(TemplateHandle(99)).await,
            Err(DrmError::InvalidTemplate(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let drm = connected().await;
        drm.disconnect().await.unwrap();
        assert!(matches!(
            drm.allocate_template().await,
            Err(DrmError::NotConnected)
        ));
        assert!(matches!(
            drm.disconnect().await,
            Err(DrmError::NotConnected)
        ));
    }
}
