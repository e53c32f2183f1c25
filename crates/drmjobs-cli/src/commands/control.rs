//! Control command implementation.

use anyhow::Result;
use console::style;

use drmjobs_core::{Action, JobId};

use super::common::{Target, close_session, open_session};

/// Execute the control command.
///
/// Every job is tried; the command fails if any of them refused the action.
pub async fn execute(target: &Target, action: Action, job_ids: &[String]) -> Result<()> {
    let session = open_session(target).await?;

    let mut refused = 0;
    for job_id in job_ids {
        let job_id = JobId::from(job_id.as_str());
        match session.control(&job_id, action).await {
            Ok(()) => println!(
                "{} {} {}",
                style("✓").green().bold(),
                action.name(),
                job_id
            ),
            Err(e) => {
                refused += 1;
                println!("{} {} {}: {}", style("✗").red().bold(), action.name(), job_id, e);
            }
        }
    }

    close_session(session).await?;

    if refused > 0 {
        anyhow::bail!("{} of {} job(s) refused {}", refused, job_ids.len(), action.name());
    }
    Ok(())
}
