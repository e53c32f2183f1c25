//! Status command implementation.

use anyhow::Result;
use console::style;
use serde::Serialize;

use drmjobs_core::{JobId, JobStatus};

use super::common::{Target, close_session, open_session, styled_status};

#[derive(Serialize)]
struct StatusRow<'a> {
    job_id: &'a JobId,
    status: JobStatus,
}

/// Execute the status command.
pub async fn execute(target: &Target, job_ids: &[String], format: &str) -> Result<()> {
    if !matches!(format, "table" | "json") {
        anyhow::bail!("Unknown output format '{format}' (expected table or json)");
    }

    let job_ids: Vec<JobId> = job_ids.iter().map(|id| JobId::from(id.as_str())).collect();

    let session = open_session(target).await?;
    let statuses = session.job_statuses(&job_ids).await;
    close_session(session).await?;
    let statuses = statuses?;

    if format == "json" {
        let rows: Vec<StatusRow<'_>> = job_ids
            .iter()
            .zip(statuses)
            .map(|(job_id, status)| StatusRow { job_id, status })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!(
        "  {:<24}  {}",
        style("JOB ID").bold(),
        style("STATUS").bold()
    );
    println!("  {}", "-".repeat(48));
    for (job_id, status) in job_ids.iter().zip(statuses) {
        println!("  {:<24}  {}", job_id.to_string(), styled_status(status));
    }

    Ok(())
}
