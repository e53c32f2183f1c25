//! drmjobs Job-Lifecycle Core
//!
//! This crate manages the local side of running jobs through a distributed
//! resource manager (DRM): job templates and their ids, attribute
//! validation, single and bulk submission, status queries, control actions
//! and blocking waits.
//!
//! # Overview
//!
//! The lifecycle of a job:
//! 1. **Session**: [`Session::init`] connects to a DRM (one active session per process)
//! 2. **Template**: allocate a [`JobTemplate`], set its command and attributes
//! 3. **Submission**: submit one job or a bulk of identical jobs
//! 4. **Tracking**: query [`JobStatus`], send control [`Action`]s
//! 5. **Completion**: `wait`/`synchronize` return a [`JobExit`]
//!
//! # Job States
//!
//! | State | Meaning |
//! |-------|---------|
//! | `QUEUED_ACTIVE` | Waiting for resources |
//! | `*_ON_HOLD` | Queued, held by user and/or system |
//! | `RUNNING` | Executing |
//! | `*_SUSPENDED` | Stopped mid-run by user and/or system |
//! | `DONE` / `FAILED` | Terminal |
//! | `UNDETERMINED` | The DRM cannot say |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use drmjobs_core::{Session, SessionConfig};
//! use drmjobs_adapter_local::LocalDrm;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let drm = Arc::new(LocalDrm::new());
//!     let mut session = Session::init(drm, "local", SessionConfig::from_env()).await?;
//!
//!     let template = session.allocate_job_template().await?;
//!     session.set_command(template, "/bin/echo", vec!["hi".into()]).await?;
//!
//!     let jobs = session.run_bulk_jobs(template, 4).await?;
//!     for exit in session.synchronize(&jobs).await? {
//!         println!("{}", exit);
//!     }
//!
//!     session.delete_job_template(template).await?;
//!     session.exit().await?;
//!     Ok(())
//! }
//! ```

pub mod attribute;
pub mod config;
pub mod controller;
pub mod error;
pub mod registry;
pub mod session;
pub mod status;
pub mod template;

#[cfg(test)]
mod mock;

pub use attribute::{
    AttributeName, AttributeSet, AttributeValue, ScalarAttribute, ValueShape, VectorAttribute,
    supported_attribute_names,
};
pub use config::SessionConfig;
pub use controller::JobController;
pub use error::{CoreError, CoreResult};
pub use registry::TemplateRegistry;
pub use session::{Session, SessionState};
pub use status::{ExitJobStatus, JobExit, JobStatus};
pub use template::{JobTemplate, TemplateId};

pub use drmjobs_drm::{Action, JobId};
