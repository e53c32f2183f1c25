//! drmjobs Local Process DRM
//!
//! A DRM that runs jobs as child processes of the current process. Useful on
//! a workstation, in CI, and for exercising the job-lifecycle core without a
//! cluster.
//!
//! # Features
//!
//! - **Slots**: at most `slots` cpus busy at once (`local:<slots>` contact)
//! - **Priority queue**: `priority=<int>` native specification, FIFO within a priority
//! - **Control**: suspend/resume via `SIGSTOP`/`SIGCONT`, terminate via `SIGKILL`
//! - **Wall clock limit**: `drmaa_wct_hlimit` kills the job when exceeded
//! - **Hold on submit**: `drmaa_js_state = drmaa_hold`
//! - **Bulk placeholders**: `$drmaa_incr_ph$` in paths and arguments
//!
//! # Attributes
//!
//! | Attribute | Honoured as |
//! |-----------|-------------|
//! | `drmaa_remote_command`, `drmaa_v_argv` | program and arguments |
//! | `drmaa_wd` | working directory (must exist) |
//! | `drmaa_v_env` | merged over the parent environment |
//! | `drmaa_input_path` / `drmaa_output_path` / `drmaa_error_path` | host part ignored |
//! | `drmaa_join_files` | stderr into the output file |
//! | `drmaa_native_specification` | `priority=<int>`, `cpus=<n>` |
//!
//! Other attributes are accepted and ignored.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use drmjobs_adapter_local::{LocalConfig, LocalDrm};
//! use drmjobs_core::{Session, SessionConfig};
//!
//! let drm = Arc::new(LocalDrm::with_config(LocalConfig::with_slots(2)));
//! let session = Session::init(drm, "local", SessionConfig::default()).await?;
//! ```

mod drm;
mod spec;

pub use drm::{LocalConfig, LocalDrm, SCHEME};
pub use spec::{JobSpec, LocalTemplate, SpecError, parse_native_specification};
