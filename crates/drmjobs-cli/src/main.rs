//! drmjobs Command-Line Interface
//!
//! Submit, inspect, control and wait for jobs on a distributed resource
//! manager. The DRM is selected by contact string: `local`, `local:<slots>`,
//! `slurm` or `slurm:<partition>`.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use drmjobs_core::Action;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{attributes, control, run, status, version, wait};

/// drmjobs - job lifecycle management for HPC resource managers
#[derive(Parser)]
#[command(name = "drmjobs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// DRM contact string (local, local:<slots>, slurm, slurm:<partition>)
    #[arg(short, long, env = "DRMJOBS_CONTACT", default_value = "local", global = true)]
    contact: String,

    /// Session configuration file (YAML)
    #[arg(long, env = "DRMJOBS_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a command as one job or a bulk of identical jobs
    Run {
        /// Command to run
        command: String,

        /// Command arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Job name
        #[arg(short = 'N', long)]
        name: Option<String>,

        /// Working directory
        #[arg(short = 'd', long)]
        wd: Option<String>,

        /// Standard output file ([host]:path or plain path)
        #[arg(short, long)]
        output: Option<String>,

        /// Standard error file ([host]:path or plain path)
        #[arg(short, long)]
        error: Option<String>,

        /// Standard input file ([host]:path or plain path)
        #[arg(short, long)]
        input: Option<String>,

        /// Write stderr into the output file
        #[arg(short, long)]
        join: bool,

        /// Submit on hold
        #[arg(long)]
        hold: bool,

        /// Wall clock hard limit ([[h:]m:]s)
        #[arg(short, long)]
        time: Option<String>,

        /// Native DRM specification
        #[arg(long)]
        native: Option<String>,

        /// Environment variable (NAME=value), repeatable
        #[arg(long = "env", value_name = "NAME=VALUE")]
        env: Vec<String>,

        /// Any other template attribute (name=value), repeatable
        #[arg(long = "attr", value_name = "NAME=VALUE")]
        attrs: Vec<String>,

        /// Number of identical jobs to submit
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Wait for the jobs to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Query job status
    Status {
        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Suspend, resume, hold, release or terminate jobs
    Control {
        /// Action to send
        action: Action,

        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Wait for jobs to finish
    Wait {
        /// Job IDs
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// List supported job template attributes
    Attributes,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    let target = commands::common::Target {
        contact: cli.contact,
        config: cli.config,
    };

    // Execute command
    let result = match cli.command {
        Commands::Run {
            command,
            args,
            name,
            wd,
            output,
            error,
            input,
            join,
            hold,
            time,
            native,
            env,
            attrs,
            count,
            wait: do_wait,
        } => {
            let request = run::RunRequest {
                command,
                args,
                name,
                wd,
                output,
                error,
                input,
                join,
                hold,
                time,
                native,
                env,
                attrs,
                count,
                wait: do_wait,
            };
            run::execute(&target, request).await
        }

        Commands::Status { job_ids, format } => status::execute(&target, &job_ids, &format).await,

        Commands::Control { action, job_ids } => control::execute(&target, action, &job_ids).await,

        Commands::Wait { job_ids } => wait::execute(&target, &job_ids).await,

        Commands::Attributes => {
            attributes::execute();
            Ok(())
        }

        Commands::Version => {
            version::execute();
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
