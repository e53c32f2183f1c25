//! Wait command implementation.
//!
//! Block until every listed job has finished, then print how each ended.

use anyhow::Result;
use console::style;

use drmjobs_core::JobId;

use super::common::{Target, close_session, open_session, print_exit, spinner};

/// Execute the wait command.
pub async fn execute(target: &Target, job_ids: &[String]) -> Result<()> {
    let job_ids: Vec<JobId> = job_ids.iter().map(|id| JobId::from(id.as_str())).collect();
    let session = open_session(target).await?;

    println!(
        "{} Waiting for {} job(s) (timeout: {})",
        style("→").cyan().bold(),
        job_ids.len(),
        match session.config().max_wait_time_secs {
            0 => "none".to_string(),
            secs => format!("{secs}s"),
        }
    );

    let spinner = spinner("Waiting for jobs to complete...")?;
    let exits = session.synchronize(&job_ids).await;
    spinner.finish_and_clear();
    close_session(session).await?;

    let exits = exits?;
    for exit in &exits {
        print_exit(exit);
    }

    let failed = exits.iter().filter(|e| !e.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} job(s) did not finish successfully", failed, exits.len());
    }
    Ok(())
}
