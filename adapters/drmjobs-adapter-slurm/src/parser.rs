//! Parsers for SLURM command output.

use drmjobs_drm::{DrmError, DrmResult, RawJobState, RawWaitStatus};

/// SLURM job state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlurmState {
    Pending,
    Running,
    Suspended,
    Completing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    NodeFail,
    Preempted,
    OutOfMemory,
    Unknown(String),
}

impl SlurmState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlurmState::Completed
                | SlurmState::Failed
                | SlurmState::Timeout
                | SlurmState::Cancelled
                | SlurmState::NodeFail
                | SlurmState::OutOfMemory
        )
    }
}

/// Information about a SLURM job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmJobInfo {
    /// SLURM job ID (`12345`, or `12345_3` for an array task).
    pub job_id: String,

    /// Job name.
    pub name: String,

    /// Current state.
    pub state: SlurmState,

    /// Reason for current state (e.g., "Resources" or "JobHeldUser" for pending).
    pub reason: Option<String>,

    /// Exit code, from sacct.
    pub exit_code: Option<i32>,

    /// Terminating signal, from sacct; 0 means none.
    pub signal: Option<i32>,

    /// Whether the job ever started, from sacct.
    pub started: bool,

    /// Elapsed run time as reported by sacct.
    pub elapsed: Option<String>,
}

impl SlurmJobInfo {
    /// Translate into a DRMAA state code.
    pub fn raw_state(&self) -> RawJobState {
        let reason = self.reason.as_deref().unwrap_or("");
        match self.state {
            SlurmState::Pending if reason == "JobHeldUser" => RawJobState::USER_ON_HOLD,
            SlurmState::Pending if reason == "JobHeldAdmin" => RawJobState::SYSTEM_ON_HOLD,
            SlurmState::Pending => RawJobState::QUEUED_ACTIVE,
            SlurmState::Running | SlurmState::Completing => RawJobState::RUNNING,
            SlurmState::Suspended => RawJobState::USER_SUSPENDED,
            SlurmState::Completed => RawJobState::DONE,
            SlurmState::Failed
            | SlurmState::Timeout
            | SlurmState::Cancelled
            | SlurmState::NodeFail
            | SlurmState::OutOfMemory => RawJobState::FAILED,
            SlurmState::Preempted | SlurmState::Unknown(_) => RawJobState::UNDETERMINED,
        }
    }

    /// Translate sacct's exit information into a wait status.
    ///
    /// A job cancelled before it started is aborted; a non-zero signal wins
    /// over the exit code.
    pub fn wait_status(&self) -> RawWaitStatus {
        if !self.started && self.state == SlurmState::Cancelled {
            return RawWaitStatus::ABORTED;
        }
        match (self.exit_code, self.signal) {
            (_, Some(signal)) if signal > 0 => RawWaitStatus::signaled(signal),
            (Some(code), _) => RawWaitStatus::exited((code & 0xff) as u8),
            (None, _) => RawWaitStatus::NO_RECORD,
        }
    }
}

/// Parse sbatch output to extract job ID.
///
/// Accepts `--parsable` output ("12345" or "12345;cluster") and the plain
/// "Submitted batch job 12345" format.
pub fn parse_sbatch_output(output: &str) -> DrmResult<String> {
    let trimmed = output.trim();
    let candidate = trimmed
        .strip_prefix("Submitted batch job ")
        .unwrap_or(trimmed)
        .split(';')
        .next()
        .unwrap_or("")
        .trim();

    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
        return Ok(candidate.to_string());
    }

    Err(DrmError::Command {
        command: "sbatch".to_string(),
        message: format!("Unexpected output format: {}", trimmed),
    })
}

/// Parse squeue output to extract job information.
///
/// Expected format (from `squeue -j <id> -o "%i|%j|%T|%r|%S"`):
/// JOBID|NAME|STATE|REASON|START_TIME
/// 12345|job_name|RUNNING|None|2024-01-15T10:30:00
pub fn parse_squeue_output(output: &str) -> DrmResult<Option<SlurmJobInfo>> {
    let Some(data_line) = output.lines().nth(1).map(str::trim) else {
        return Ok(None);
    };
    if data_line.is_empty() {
        return Ok(None);
    }

    let parts: Vec<&str> = data_line.split('|').collect();
    if parts.len() < 4 {
        return Err(DrmError::Command {
            command: "squeue".to_string(),
            message: format!("Unexpected output format: {}", data_line),
        });
    }

    let reason = match parts[3].trim() {
        "None" | "" => None,
        other => Some(other.to_string()),
    };

    Ok(Some(SlurmJobInfo {
        job_id: parts[0].trim().to_string(),
        name: parts[1].trim().to_string(),
        state: parse_slurm_state(parts[2].trim()),
        reason,
        exit_code: None,
        signal: None,
        started: true,
        elapsed: None,
    }))
}

/// Parse sacct output for finished job information.
///
/// Expected format (from `sacct -j <id> -o JobID,JobName,State,ExitCode,Start,Elapsed -P`):
/// JobID|JobName|State|ExitCode|Start|Elapsed
/// 12345|job_name|COMPLETED|0:0|2024-01-15T10:30:00|00:00:05
/// 12345.batch|batch|COMPLETED|0:0|2024-01-15T10:30:00|00:00:05
pub fn parse_sacct_output(output: &str) -> DrmResult<Option<SlurmJobInfo>> {
    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 4 {
            continue;
        }

        let job_id = parts[0].trim();
        // Skip job steps (e.g., "12345.batch", "12345.extern")
        if job_id.contains('.') {
            continue;
        }

        let (exit_code, signal) = parse_exit_code(parts[3].trim());
        let start = parts.get(4).map_or("", |s| s.trim());

        return Ok(Some(SlurmJobInfo {
            job_id: job_id.to_string(),
            name: parts[1].trim().to_string(),
            state: parse_slurm_state(parts[2].trim()),
            reason: None,
            exit_code,
            signal,
            started: !matches!(start, "" | "None" | "Unknown"),
            elapsed: parts
                .get(5)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }));
    }

    Ok(None)
}

/// Parse SLURM state string. sacct may append detail ("CANCELLED by 1000").
pub fn parse_slurm_state(state: &str) -> SlurmState {
    let word = state.split_whitespace().next().unwrap_or("");
    match word.to_uppercase().as_str() {
        "PENDING" | "PD" => SlurmState::Pending,
        "RUNNING" | "R" => SlurmState::Running,
        "SUSPENDED" | "S" => SlurmState::Suspended,
        "COMPLETING" | "CG" => SlurmState::Completing,
        "COMPLETED" | "CD" => SlurmState::Completed,
        "FAILED" | "F" => SlurmState::Failed,
        "TIMEOUT" | "TO" => SlurmState::Timeout,
        "CANCELLED" | "CA" => SlurmState::Cancelled,
        "NODE_FAIL" | "NF" => SlurmState::NodeFail,
        "PREEMPTED" | "PR" => SlurmState::Preempted,
        "OUT_OF_MEMORY" | "OOM" => SlurmState::OutOfMemory,
        _ => SlurmState::Unknown(state.to_string()),
    }
}

/// Parse SLURM exit format "exit_code:signal".
fn parse_exit_code(code: &str) -> (Option<i32>, Option<i32>) {
    let mut parts = code.split(':');
    let exit = parts.next().and_then(|s| s.parse().ok());
    let signal = parts.next().and_then(|s| s.parse().ok());
    (exit, signal)
}

/// Outcome of a failed scontrol or scancel call.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlFailure {
    /// SLURM does not know the job.
    UnknownJob,
    /// SLURM refused the action for the job's current state.
    Refused(String),
    /// The controller could not be reached.
    Unreachable(String),
}

/// Whether stderr says the job id is unknown to SLURM.
pub fn is_unknown_job(stderr: &str) -> bool {
    stderr.contains("Invalid job id") || stderr.contains("does not exist")
}

/// Whether stderr says the controller or accounting database is unreachable.
pub fn is_unreachable(stderr: &str) -> bool {
    [
        "Unable to contact slurm controller",
        "Connection refused",
        "Socket timed out",
        "Zero Bytes were transmitted",
        "Problem talking to the database",
        "Communication connection failure",
    ]
    .iter()
    .any(|pattern| stderr.contains(pattern))
}

/// Last line of a SLURM error message without its `command: error:` prefix.
pub fn error_message(stderr: &str) -> Option<String> {
    stderr
        .trim()
        .lines()
        .last()
        .map(|line| line.rsplit("error: ").next().unwrap_or(line).trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Classify scontrol/scancel stderr. `None` means the action went through.
pub fn parse_control_output(success: bool, stderr: &str) -> Option<ControlFailure> {
    let stderr = stderr.trim();
    if is_unknown_job(stderr) {
        return Some(ControlFailure::UnknownJob);
    }
    if is_unreachable(stderr) {
        return Some(ControlFailure::Unreachable(
            error_message(stderr).unwrap_or_else(|| stderr.to_string()),
        ));
    }
    if stderr.contains("already completing") {
        return None;
    }
    if !success || !stderr.is_empty() {
        let message = error_message(stderr).unwrap_or_else(|| "rejected by SLURM".to_string());
        return Some(ControlFailure::Refused(message));
    }
    None
}
