//! Run command implementation.
//!
//! Fill a job template from the command line, submit one job or a bulk of
//! identical jobs and optionally wait for them.

use anyhow::{Context, Result};
use console::style;

use drmjobs_core::{JobExit, JobId, ScalarAttribute, Session, TemplateId, VectorAttribute};
use drmjobs_drm::attr;

use super::common::{Target, close_session, open_session, path_spec, print_exit, spinner};

/// Everything `drmjobs run` was asked to do.
pub struct RunRequest {
    pub command: String,
    pub args: Vec<String>,
    pub name: Option<String>,
    pub wd: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub input: Option<String>,
    pub join: bool,
    pub hold: bool,
    pub time: Option<String>,
    pub native: Option<String>,
    pub env: Vec<String>,
    pub attrs: Vec<String>,
    pub count: u32,
    pub wait: bool,
}

/// Execute the run command.
pub async fn execute(target: &Target, request: RunRequest) -> Result<()> {
    if request.count == 0 {
        anyhow::bail!("--count must be at least 1");
    }

    let mut session = open_session(target).await?;
    let outcome = submit(&mut session, &request).await;
    close_session(session).await?;

    let exits = outcome?;
    let failed = exits.iter().filter(|e| !e.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} job(s) did not finish successfully", failed, exits.len());
    }
    Ok(())
}

async fn submit(session: &mut Session, request: &RunRequest) -> Result<Vec<JobExit>> {
    let template = session.allocate_job_template().await?;
    fill_template(session, template, request).await?;

    let job_ids: Vec<JobId> = if request.count == 1 {
        vec![session.run_job(template).await?]
    } else {
        session.run_bulk_jobs(template, request.count).await?
    };

    println!(
        "{} Submitted {} job(s) to {}",
        style("✓").green().bold(),
        job_ids.len(),
        style(session.drm_name()).cyan()
    );
    for job_id in &job_ids {
        println!("  {}", job_id);
    }

    if !request.wait {
        if session.jobs_outlive_session() {
            return Ok(Vec::new());
        }
        println!(
            "{} {} jobs end with the session; waiting for them",
            style("→").cyan().bold(),
            session.drm_name()
        );
    }

    let spinner = spinner(format!("Waiting for {} job(s)...", job_ids.len()))?;
    let exits = session.synchronize(&job_ids).await;
    spinner.finish_and_clear();

    let exits = exits?;
    println!();
    for exit in &exits {
        print_exit(exit);
    }
    Ok(exits)
}

async fn fill_template(session: &mut Session, id: TemplateId, request: &RunRequest) -> Result<()> {
    session
        .set_command(id, &request.command, request.args.clone())
        .await?;

    let scalars = [
        (ScalarAttribute::JobName, request.name.clone()),
        (ScalarAttribute::WorkingDirectory, request.wd.clone()),
        (ScalarAttribute::OutputPath, request.output.as_deref().map(path_spec)),
        (ScalarAttribute::ErrorPath, request.error.as_deref().map(path_spec)),
        (ScalarAttribute::InputPath, request.input.as_deref().map(path_spec)),
        (ScalarAttribute::WallClockHardLimit, request.time.clone()),
        (ScalarAttribute::NativeSpecification, request.native.clone()),
    ];
    for (attribute, value) in scalars {
        if let Some(value) = value {
            session.set_scalar(id, attribute, &value).await?;
        }
    }

    if request.join {
        session.set_scalar(id, ScalarAttribute::JoinFiles, "y").await?;
    }
    if request.hold {
        session
            .set_scalar(id, ScalarAttribute::JobSubmissionState, attr::JS_STATE_HOLD)
            .await?;
    }
    if !request.env.is_empty() {
        session
            .set_vector(id, VectorAttribute::Environment, request.env.clone())
            .await?;
    }

    for entry in &request.attrs {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("Invalid attribute '{entry}', expected name=value"))?;
        if name.parse::<VectorAttribute>().is_ok() {
            let values = value.split(',').map(str::to_string).collect();
            session.set_vector_attribute(id, name, values).await?;
        } else {
            session.set_attribute(id, name, value).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, args: &[&str]) -> RunRequest {
        RunRequest {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            name: None,
            wd: None,
            output: None,
            error: None,
            input: None,
            join: false,
            hold: false,
            time: None,
            native: None,
            env: Vec::new(),
            attrs: Vec::new(),
            count: 1,
            wait: false,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_run_finishes_before_exit() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let target = Target {
            contact: "local".to_string(),
            config: None,
        };

        let script = format!("sleep 0.3; touch '{}'", marker.display());
        execute(&target, request("/bin/sh", &["-c", script.as_str()]))
            .await
            .unwrap();
        assert!(marker.exists());

        let err = execute(&target, request("/bin/sh", &["-c", "exit 4"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not finish successfully"));

        let mut zero = request("/bin/true", &[]);
        zero.count = 0;
        assert!(execute(&target, zero).await.is_err());
    }
}
