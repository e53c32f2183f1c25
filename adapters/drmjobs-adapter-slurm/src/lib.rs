//! SLURM DRM for drmjobs.
//!
//! Drives a SLURM cluster through its command-line tools:
//!
//! | Operation | Command |
//! |-----------|---------|
//! | submit | `sbatch --parsable ... --wrap '<command line>'` |
//! | bulk submit | `sbatch --array=0-(n-1)`; tasks are `<id>_<index>` |
//! | status | `squeue`, falling back to `sacct` once the job has left the queue |
//! | suspend / resume / hold / release | `scontrol <action> <id>` |
//! | terminate | `scancel <id>` |
//! | exit status | `sacct` `ExitCode` (`code:signal`) |
//!
//! Template attributes become sbatch options: job name, `--chdir`, I/O paths
//! (with the bulk index placeholder mapped to `%a`), `--hold`, `--time`,
//! `--export`, `--mail-user`, job category as `--qos`. The native
//! specification is appended verbatim, so sbatch itself rejects bad options.
//! Start and deadline times and soft limits are not passed on.
//!
//! The contact string is `slurm` or `slurm:<partition>`.
//!
//! ```ignore
//! use drmjobs_adapter_slurm::{SlurmConfig, SlurmDrm};
//!
//! // No commands are run in mock mode.
//! let drm = SlurmDrm::mock(SlurmConfig::default());
//! ```

mod adapter;
pub mod parser;
mod templates;

pub use adapter::{SCHEME, SlurmConfig, SlurmDrm};
pub use templates::{SlurmTemplate, sbatch_args};
