//! Shared helpers for CLI commands.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::{StyledObject, style};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use drmjobs_adapter_local::LocalDrm;
use drmjobs_adapter_slurm::SlurmDrm;
use drmjobs_core::{JobExit, JobStatus, Session, SessionConfig};
use drmjobs_drm::DrmRegistry;

/// Where to connect and how to configure the session.
pub struct Target {
    pub contact: String,
    pub config: Option<PathBuf>,
}

/// Registry of the DRMs this binary can drive. Empty contacts mean `local`.
pub fn drm_registry() -> DrmRegistry {
    let mut registry = DrmRegistry::new();
    registry.register_factory(drmjobs_adapter_local::SCHEME, LocalDrm::factory);
    registry.register_factory(drmjobs_adapter_slurm::SCHEME, SlurmDrm::factory);
    registry.set_default(drmjobs_adapter_local::SCHEME);
    registry
}

/// Default config file location (~/.config/drmjobs/config.yaml).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("drmjobs").join("config.yaml"))
}

/// Load the session configuration.
///
/// An explicit path must exist; the default location is optional.
/// `DRMJOBS_*` environment variables override file values.
pub fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    let file = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|p| p.exists()),
    };

    let config = match file {
        Some(file) => {
            debug!("Loading session config from {}", file.display());
            let source = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read config file: {}", file.display()))?;
            serde_yaml_ng::from_str(&source)
                .with_context(|| format!("Invalid config file: {}", file.display()))?
        }
        None => SessionConfig::default(),
    };

    Ok(config.with_overrides(|key| std::env::var(key).ok()))
}

/// Open a session on the target DRM.
pub async fn open_session(target: &Target) -> Result<Session> {
    let config = load_config(target.config.as_deref())?;
    let drm = drm_registry().create(&target.contact)?;
    Ok(Session::init(drm, &target.contact, config).await?)
}

/// Delete remaining templates and exit the session.
pub async fn close_session(mut session: Session) -> Result<()> {
    for id in session.job_template_ids() {
        session.delete_job_template(id).await?;
    }
    session.exit().await?;
    Ok(())
}

/// Accept plain paths where a `[host]:path` specification is expected.
pub fn path_spec(value: &str) -> String {
    if value.contains(':') {
        value.to_string()
    } else {
        format!(":{value}")
    }
}

/// Colour a job status by how it is doing.
pub fn styled_status(status: JobStatus) -> StyledObject<&'static str> {
    let name = status.name();
    match status {
        JobStatus::Done => style(name).green(),
        JobStatus::Failed => style(name).red(),
        JobStatus::Running => style(name).cyan(),
        JobStatus::Undetermined => style(name).dim(),
        _ => style(name).yellow(),
    }
}

/// Spinner shown while blocking on the DRM.
pub fn spinner(message: impl Into<String>) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message.into());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(spinner)
}

/// Print one line per finished job.
pub fn print_exit(exit: &JobExit) {
    let marker = if exit.is_success() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!("{} {}", marker, exit);
    for (name, value) in &exit.resource_usage {
        println!("    {}: {}", style(name).dim(), value);
    }
}
