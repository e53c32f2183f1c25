//! Translation of job template attributes into sbatch options.

use std::time::Duration;

use drmjobs_drm::attr;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::adapter::SlurmConfig;

/// Placeholder replaced by the task index of an array job.
pub const INCR_PLACEHOLDER: &str = "$drmaa_incr_ph$";
/// Placeholder replaced by the submitting user's home directory.
pub const HOME_PLACEHOLDER: &str = "$drmaa_home_dir$";
/// Placeholder replaced by the job's working directory.
pub const WD_PLACEHOLDER: &str = "$drmaa_wd_ph$";

/// Attribute values of one SLURM template.
#[derive(Debug, Clone, Default)]
pub struct SlurmTemplate {
    pub scalars: FxHashMap<String, String>,
    pub vectors: FxHashMap<String, Vec<String>>,
}

impl SlurmTemplate {
    fn scalar(&self, name: &str) -> Option<&str> {
        self.scalars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    fn vector(&self, name: &str) -> &[String] {
        self.vectors.get(name).map_or(&[], Vec::as_slice)
    }
}

/// Build the sbatch argument list for a template.
///
/// `array` submits that many tasks as one array job. The job itself runs
/// through `--wrap`, so the command line is shell-quoted here.
pub fn sbatch_args(
    template: &SlurmTemplate,
    config: &SlurmConfig,
    array: Option<u32>,
) -> Result<Vec<String>, String> {
    let command = template
        .scalar(attr::REMOTE_COMMAND)
        .ok_or_else(|| "no remote command set".to_string())?;

    let mut args = vec!["--parsable".to_string()];

    if let Some(name) = template.scalar(attr::JOB_NAME) {
        args.push(format!("--job-name={}", sanitize_name(name)));
    }

    if let Some(partition) = &config.partition {
        args.push(format!("--partition={}", partition));
    }
    if let Some(account) = &config.account {
        args.push(format!("--account={}", account));
    }
    if let Some(category) = template.scalar(attr::JOB_CATEGORY) {
        args.push(format!("--qos={}", category));
    }

    let wd = template.scalar(attr::WD).map(expand_home);
    if let Some(wd) = &wd {
        args.push(format!("--chdir={}", wd));
    }

    let join = template.scalar(attr::JOIN_FILES) == Some("y");
    for (name, option) in [
        (attr::INPUT_PATH, "--input"),
        (attr::OUTPUT_PATH, "--output"),
        (attr::ERROR_PATH, "--error"),
    ] {
        if join && name == attr::ERROR_PATH {
            // Without --error, SLURM writes stderr to the output file.
            continue;
        }
        if let Some(value) = template.scalar(name) {
            let (host, path) = attr::parse_path_spec(value)?;
            if let Some(host) = host {
                debug!("Ignoring host '{}' in {}", host, name);
            }
            args.push(format!("{}={}", option, file_pattern(&path.to_string_lossy(), wd.as_deref())));
        }
    }

    if template.scalar(attr::JS_STATE) == Some(attr::JS_STATE_HOLD) {
        args.push("--hold".to_string());
    }

    if let Some(limit) = template.scalar(attr::WCT_HLIMIT) {
        args.push(format!("--time={}", format_time(attr::parse_duration_spec(limit)?)));
    }

    let env = template.vector(attr::V_ENV);
    if !env.is_empty() {
        if let Some(bad) = env.iter().find(|e| e.contains(',')) {
            return Err(format!("environment entry '{}' contains a comma", bad));
        }
        args.push(format!("--export=ALL,{}", env.join(",")));
    }

    let emails = template.vector(attr::V_EMAIL);
    if !emails.is_empty() {
        args.push(format!("--mail-user={}", emails.join(",")));
        if template.scalar(attr::BLOCK_EMAIL) != Some("1") {
            args.push("--mail-type=END,FAIL".to_string());
        }
    }

    for ignored in [attr::START_TIME, attr::DEADLINE_TIME, attr::WCT_SLIMIT] {
        if template.scalar(ignored).is_some() {
            debug!("{} is not passed to SLURM", ignored);
        }
    }

    if let Some(count) = array {
        if count == 0 {
            return Err("array job needs at least one task".to_string());
        }
        args.push(format!("--array=0-{}", count - 1));
    }

    if let Some(native) = template.scalar(attr::NATIVE_SPECIFICATION) {
        args.extend(native.split_whitespace().map(str::to_string));
    }

    let mut line = vec![shell_word(command)];
    line.extend(template.vector(attr::V_ARGV).iter().map(|a| shell_word(a)));
    args.push(format!("--wrap={}", line.join(" ")));

    Ok(args)
}

/// Rewrite placeholders in an I/O path into sbatch filename patterns.
fn file_pattern(path: &str, wd: Option<&str>) -> String {
    let path = expand_home(path).replace(INCR_PLACEHOLDER, "%a");
    match wd {
        Some(wd) => path.replace(WD_PLACEHOLDER, wd),
        None => path.replace(WD_PLACEHOLDER, "."),
    }
}

fn expand_home(value: &str) -> String {
    match dirs::home_dir() {
        Some(home) => value.replace(HOME_PLACEHOLDER, &home.to_string_lossy()),
        None => value.to_string(),
    }
}

/// Quote one word for the `--wrap` shell, resolving placeholders at run time.
fn shell_word(value: &str) -> String {
    let mut word = String::new();
    let mut rest = value;
    while !rest.is_empty() {
        let next = [
            (INCR_PLACEHOLDER, "\"${SLURM_ARRAY_TASK_ID:-0}\""),
            (HOME_PLACEHOLDER, "\"$HOME\""),
            (WD_PLACEHOLDER, "\"$PWD\""),
        ]
        .into_iter()
        .filter_map(|(ph, shell)| rest.find(ph).map(|at| (at, ph, shell)))
        .min_by_key(|(at, _, _)| *at);

        match next {
            Some((at, ph, shell)) => {
                if at > 0 {
                    word.push_str(&single_quote(&rest[..at]));
                }
                word.push_str(shell);
                rest = &rest[at + ph.len()..];
            }
            None => {
                word.push_str(&single_quote(rest));
                rest = "";
            }
        }
    }
    if word.is_empty() {
        word.push_str("''");
    }
    word
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Sanitize job name for SLURM.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(64) // SLURM has a 64 character limit for job names
        .collect()
}

/// Format a duration as SLURM time (D-HH:MM:SS or HH:MM:SS), rounding up to whole minutes.
fn format_time(limit: Duration) -> String {
    let minutes = limit.as_secs().div_ceil(60).max(1);
    let hours = minutes / 60;
    let mins = minutes % 60;

    if hours >= 24 {
        let days = hours / 24;
        let remaining_hours = hours % 24;
        format!("{}-{:02}:{:02}:00", days, remaining_hours, mins)
    } else {
        format!("{:02}:{:02}:00", hours, mins)
    }
}
