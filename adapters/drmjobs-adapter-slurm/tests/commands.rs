//! SLURM DRM against stand-in `squeue`, `sacct` and `scontrol` scripts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use drmjobs_adapter_slurm::{SlurmConfig, SlurmDrm};
use drmjobs_drm::{Action, Drm, DrmError, JobId, RawJobState, RawWaitStatus};
use tempfile::TempDir;
use tokio::sync::Mutex;

// Scripts are written and executed in the same process; one test at a time
// keeps a forked child from holding another test's script open for writing.
static SCRIPTS: Mutex<()> = Mutex::const_new(());

const SQUEUE_VERSION: &str = r#"if [ "$1" = "--version" ]; then echo "slurm 23.11.4"; exit 0; fi"#;

fn install(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

async fn connected(dir: &TempDir) -> SlurmDrm {
    let drm = SlurmDrm::new(SlurmConfig {
        bin_dir: Some(dir.path().to_path_buf()),
        poll_interval: Duration::from_millis(10),
        ..SlurmConfig::default()
    });
    drm.connect("slurm").await.unwrap();
    drm
}

fn controller_down(dir: &Path) {
    install(
        dir,
        "squeue",
        &format!(
            "{SQUEUE_VERSION}\necho 'slurm_load_jobs error: Unable to contact slurm controller (connect failure)' >&2\nexit 1"
        ),
    );
    install(
        dir,
        "sacct",
        "echo 'sacct: error: Problem talking to the database: Connection refused' >&2\nexit 1",
    );
    install(
        dir,
        "scontrol",
        "echo 'scontrol: error: Unable to contact slurm controller (connect failure)' >&2\nexit 1",
    );
}

fn job_left_queue(dir: &Path, sacct_rows: &str) {
    install(
        dir,
        "squeue",
        &format!(
            "{SQUEUE_VERSION}\necho 'slurm_load_jobs error: Invalid job id specified' >&2\nexit 1"
        ),
    );
    install(
        dir,
        "sacct",
        &format!("cat <<'EOF'\nJobID|JobName|State|ExitCode|Start|Elapsed\n{sacct_rows}EOF"),
    );
}

#[tokio::test]
async fn test_unreachable_controller_is_connection_failure() {
    let _guard = SCRIPTS.lock().await;
    let dir = tempfile::tempdir().unwrap();
    controller_down(dir.path());
    let drm = connected(&dir).await;
    let job_id = JobId::new("12345");

    let err = drm.query_status(&job_id).await.unwrap_err();
    assert!(matches!(err, DrmError::ConnectionLost(_)), "{err}");
    assert!(err.is_connection_failure());

    let err = drm.wait(&job_id, Duration::from_millis(50)).await.unwrap_err();
    assert!(err.is_connection_failure(), "{err}");

    let err = drm.control(&job_id, Action::Suspend).await.unwrap_err();
    assert!(matches!(err, DrmError::ConnectionLost(_)), "{err}");
}

#[tokio::test]
async fn test_finished_job_read_from_sacct() {
    let _guard = SCRIPTS.lock().await;
    let dir = tempfile::tempdir().unwrap();
    job_left_queue(
        dir.path(),
        "12345|job|COMPLETED|3:0|2024-01-15T10:30:00|00:00:05\n12345.batch|batch|COMPLETED|3:0|2024-01-15T10:30:00|00:00:05\n",
    );
    let drm = connected(&dir).await;
    let job_id = JobId::new("12345");

    assert_eq!(drm.query_status(&job_id).await.unwrap(), RawJobState::DONE);
    let exit = drm.wait(&job_id, Duration::ZERO).await.unwrap();
    assert_eq!(exit.status, RawWaitStatus::exited(3));
    assert_eq!(exit.resource_usage["elapsed"], "00:00:05");
}

#[tokio::test]
async fn test_job_unknown_everywhere() {
    let _guard = SCRIPTS.lock().await;
    let dir = tempfile::tempdir().unwrap();
    job_left_queue(dir.path(), "");
    let drm = connected(&dir).await;

    assert!(matches!(
        drm.query_status(&JobId::new("404")).await,
        Err(DrmError::InvalidJob(_))
    ));
}
