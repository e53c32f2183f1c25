//! Job state model and raw-code translation.
//!
//! The DRM reports program state and exit information as raw DRMAA codes
//! ([`RawJobState`], [`RawWaitStatus`]). This module is the only place those
//! codes are interpreted.

use std::collections::BTreeMap;
use std::fmt;

use drmjobs_drm::{JobId, RawExit, RawJobState, RawWaitStatus};
use serde::{Deserialize, Serialize};

/// Program state of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// The DRM cannot say (or does not know the job).
    Undetermined,
    /// Queued and eligible to run.
    QueuedActive,
    /// Queued and held by the system.
    SystemOnHold,
    /// Queued and held by the user.
    UserOnHold,
    /// Queued and held by both.
    UserSystemOnHold,
    /// Running.
    Running,
    /// Suspended by the system.
    SystemSuspended,
    /// Suspended by the user.
    UserSuspended,
    /// Suspended by both.
    UserSystemSuspended,
    /// Finished normally.
    Done,
    /// Finished abnormally.
    Failed,
}

impl JobStatus {
    /// Translate a raw DRM state code. Unrecognized codes are `Undetermined`.
    pub fn from_raw(raw: RawJobState) -> Self {
        match raw {
            RawJobState::QUEUED_ACTIVE => JobStatus::QueuedActive,
            RawJobState::SYSTEM_ON_HOLD => JobStatus::SystemOnHold,
            RawJobState::USER_ON_HOLD => JobStatus::UserOnHold,
            RawJobState::USER_SYSTEM_ON_HOLD => JobStatus::UserSystemOnHold,
            RawJobState::RUNNING => JobStatus::Running,
            RawJobState::SYSTEM_SUSPENDED => JobStatus::SystemSuspended,
            RawJobState::USER_SUSPENDED => JobStatus::UserSuspended,
            RawJobState::USER_SYSTEM_SUSPENDED => JobStatus::UserSystemSuspended,
            RawJobState::DONE => JobStatus::Done,
            RawJobState::FAILED => JobStatus::Failed,
            _ => JobStatus::Undetermined,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Check if the job is on hold.
    pub fn is_held(self) -> bool {
        matches!(
            self,
            JobStatus::SystemOnHold | JobStatus::UserOnHold | JobStatus::UserSystemOnHold
        )
    }

    /// Check if the job is suspended.
    pub fn is_suspended(self) -> bool {
        matches!(
            self,
            JobStatus::SystemSuspended | JobStatus::UserSuspended | JobStatus::UserSystemSuspended
        )
    }

    /// Get a human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            JobStatus::Undetermined => "UNDETERMINED",
            JobStatus::QueuedActive => "QUEUED_ACTIVE",
            JobStatus::SystemOnHold => "SYSTEM_ON_HOLD",
            JobStatus::UserOnHold => "USER_ON_HOLD",
            JobStatus::UserSystemOnHold => "USER_SYSTEM_ON_HOLD",
            JobStatus::Running => "RUNNING",
            JobStatus::SystemSuspended => "SYSTEM_SUSPENDED",
            JobStatus::UserSuspended => "USER_SUSPENDED",
            JobStatus::UserSystemSuspended => "USER_SYSTEM_SUSPENDED",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a finished job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitJobStatus {
    /// The DRM has no record of the job.
    UndeterminedJob,
    /// The job was removed before it ever ran.
    ExitAborted,
    /// The job exited on its own.
    FinishedRegularly,
    /// The job was killed by a signal.
    FinishedTermSig,
    /// The job ended, but the DRM cannot say how.
    FinishedUnclearConditions,
}

impl ExitJobStatus {
    /// Classify a raw wait status.
    ///
    /// Total over every `i32`: anything that is neither a sentinel, a regular
    /// exit nor a signal termination is `FinishedUnclearConditions`.
    pub fn from_raw(raw: RawWaitStatus) -> Self {
        if raw == RawWaitStatus::NO_RECORD {
            ExitJobStatus::UndeterminedJob
        } else if raw == RawWaitStatus::ABORTED {
            ExitJobStatus::ExitAborted
        } else if raw.exit_code().is_some() {
            ExitJobStatus::FinishedRegularly
        } else if raw.term_signal().is_some() {
            ExitJobStatus::FinishedTermSig
        } else {
            ExitJobStatus::FinishedUnclearConditions
        }
    }

    /// Get a human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            ExitJobStatus::UndeterminedJob => "UNDETERMINED_JOB",
            ExitJobStatus::ExitAborted => "EXIT_ABORTED",
            ExitJobStatus::FinishedRegularly => "FINISHED_REGULARLY",
            ExitJobStatus::FinishedTermSig => "FINISHED_TERM_SIG",
            ExitJobStatus::FinishedUnclearConditions => "FINISHED_UNCLEAR_CONDITIONS",
        }
    }
}

impl fmt::Display for ExitJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of waiting for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExit {
    /// The job waited on.
    pub job_id: JobId,
    /// How it ended.
    pub status: ExitJobStatus,
    /// Exit code, for `FinishedRegularly`.
    pub exit_code: Option<i32>,
    /// Terminating signal, for `FinishedTermSig`.
    pub term_signal: Option<i32>,
    /// Whether the signal left a core dump.
    pub core_dumped: bool,
    /// Resource usage reported by the DRM.
    pub resource_usage: BTreeMap<String, String>,
}

impl JobExit {
    /// Build from a reaped DRM record.
    pub fn from_raw(job_id: JobId, raw: RawExit) -> Self {
        Self {
            job_id,
            status: ExitJobStatus::from_raw(raw.status),
            exit_code: raw.status.exit_code(),
            term_signal: raw.status.term_signal(),
            core_dumped: raw.status.core_dumped(),
            resource_usage: raw.resource_usage,
        }
    }

    /// Result for a job the DRM has no record of.
    pub fn undetermined(job_id: JobId) -> Self {
        Self::from_raw(job_id, RawExit::new(RawWaitStatus::NO_RECORD))
    }

    /// Whether the job exited on its own with code 0.
    pub fn is_success(&self) -> bool {
        self.status == ExitJobStatus::FinishedRegularly && self.exit_code == Some(0)
    }
}

impl fmt::Display for JobExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job_id, self.status)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        if let Some(signal) = self.term_signal {
            write!(f, " (signal {signal}")?;
            if self.core_dumped {
                write!(f, ", core dumped")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}
