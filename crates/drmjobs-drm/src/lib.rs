//! drmjobs DRM boundary
//!
//! This crate defines the contract between the drmjobs core and a distributed
//! resource manager (DRM): the cluster scheduler that actually places jobs.
//! The core never talks to a scheduler directly; it drives an implementation
//! of the [`Drm`] trait.
//!
//! # Overview
//!
//! - [`Drm`]: async client trait (connect, templates, submit, control, status, wait)
//! - [`RawJobState`] / [`RawWaitStatus`]: DRMAA-numbered status and exit codes
//! - [`attr`]: wire names of job template attributes and value-format helpers
//! - [`DrmRegistry`]: contact-string scheme → DRM factory
//!
//! # Implementations
//!
//! | DRM | Crate | Contact string |
//! |-----|-------|----------------|
//! | Local processes | `drmjobs-adapter-local` | `local`, `local:<slots>` |
//! | SLURM | `drmjobs-adapter-slurm` | `slurm`, `slurm:<partition>` |
//!
//! # Implementing a DRM
//!
//! ```ignore
//! use drmjobs_drm::{Action, Drm, DrmResult, JobId, RawExit, RawJobState, TemplateHandle};
//! use async_trait::async_trait;
//!
//! struct MyDrm;
//!
//! #[async_trait]
//! impl Drm for MyDrm {
//!     fn name(&self) -> &str { "my_drm" }
//!
//!     async fn connect(&self, contact: &str) -> DrmResult<()> {
//!         // Open the scheduler connection
//!         # todo!()
//!     }
//!
//!     async fn submit(&self, handle: TemplateHandle) -> DrmResult<JobId> {
//!         // Hand the template to the scheduler
//!         # todo!()
//!     }
//!
//!     // ... remaining methods
//! }
//! ```

pub mod attr;
pub mod drm;
pub mod error;
pub mod job;
pub mod raw;
pub mod registry;

pub use drm::{BulkSubmission, Drm};
pub use error::{DrmError, DrmResult};
pub use job::{Action, JobId, TemplateHandle};
pub use raw::{RawExit, RawJobState, RawWaitStatus};
pub use registry::DrmRegistry;
