//! Version command implementation.

use console::style;

/// Execute the version command.
pub fn execute() {
    let version = env!("CARGO_PKG_VERSION");

    println!(
        "{} {} - job lifecycle management for distributed resource managers",
        style("drmjobs").cyan().bold(),
        style(format!("v{version}")).yellow()
    );
    println!();
    println!("Components:");
    println!("  drmjobs-drm            DRM interface, raw codes and attribute names");
    println!("  drmjobs-core           Sessions, job templates and job control");
    println!("  drmjobs-adapter-local  Process-backed DRM on this host");
    println!("  drmjobs-adapter-slurm  SLURM through sbatch, squeue, sacct and scontrol");
    println!();
    println!("DRMs:       {}", super::common::drm_registry().available().join(", "));
    println!("License:    {}", style("Apache-2.0").dim());
}
