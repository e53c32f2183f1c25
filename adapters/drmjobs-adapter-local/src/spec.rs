//! Translation of template attributes into a runnable job description.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drmjobs_drm::attr;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

/// Placeholder replaced by the job's index within a bulk submission.
pub const INCR_PLACEHOLDER: &str = "$drmaa_incr_ph$";
/// Placeholder replaced by the submitting user's home directory.
pub const HOME_PLACEHOLDER: &str = "$drmaa_home_dir$";
/// Placeholder replaced by the job's working directory.
pub const WD_PLACEHOLDER: &str = "$drmaa_wd_ph$";

/// Reasons a template cannot be turned into a job.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("no remote command set")]
    MissingCommand,

    #[error("working directory {0} does not exist")]
    MissingWorkingDirectory(PathBuf),

    #[error("invalid {name}: {message}")]
    InvalidValue { name: &'static str, message: String },

    #[error("unsupported native specification '{0}' (expected priority=<int> or cpus=<n>)")]
    UnsupportedNative(String),

    #[error("job needs {cpus} cpus but only {slots} slots exist")]
    Unsatisfiable { cpus: usize, slots: usize },
}

/// Attribute values of one local template.
#[derive(Debug, Clone, Default)]
pub struct LocalTemplate {
    pub scalars: FxHashMap<String, String>,
    pub vectors: FxHashMap<String, Vec<String>>,
}

impl LocalTemplate {
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

/// Everything needed to start one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub join_files: bool,
    pub hold: bool,
    pub wall_clock_limit: Option<Duration>,
    pub priority: i32,
    pub cpus: usize,
    pub name: Option<String>,
}

impl JobSpec {
    /// Build the job for bulk index `index` out of `template`.
    pub fn from_template(
        template: &LocalTemplate,
        index: u32,
        slots: usize,
    ) -> Result<Self, SpecError> {
        let home = dirs::home_dir();
        let expand = |value: &str, wd: Option<&Path>| -> String {
            let mut value = value.replace(INCR_PLACEHOLDER, &index.to_string());
            if let Some(home) = &home {
                value = value.replace(HOME_PLACEHOLDER, &home.to_string_lossy());
            }
            if let Some(wd) = wd {
                value = value.replace(WD_PLACEHOLDER, &wd.to_string_lossy());
            }
            value
        };

        let command = template
            .scalar(attr::REMOTE_COMMAND)
            .ok_or(SpecError::MissingCommand)?;

        let working_dir = template
            .scalar(attr::WD)
            .map(|wd| PathBuf::from(expand(wd, None)));
        if let Some(wd) = &working_dir {
            if !wd.is_dir() {
                return Err(SpecError::MissingWorkingDirectory(wd.clone()));
            }
        }
        let wd = working_dir.as_deref();

        let args = template
            .vector(attr::V_ARGV)
            .iter()
            .map(|a| expand(a, wd))
            .collect();

        let env = template
            .vector(attr::V_ENV)
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), expand(v, wd)))
                    .ok_or_else(|| SpecError::InvalidValue {
                        name: attr::V_ENV,
                        message: format!("'{entry}' is not NAME=value"),
                    })
            })
            .collect::<Result<_, _>>()?;

        let path = |name: &'static str| -> Result<Option<PathBuf>, SpecError> {
            let Some(value) = template.scalar(name) else {
                return Ok(None);
            };
            let (host, path) = attr::parse_path_spec(&expand(value, wd))
                .map_err(|message| SpecError::InvalidValue { name, message })?;
            if let Some(host) = host {
                debug!("Ignoring host '{}' in {}", host, name);
            }
            Ok(Some(match wd {
                Some(wd) if path.is_relative() => wd.join(path),
                _ => path,
            }))
        };

        let wall_clock_limit = template
            .scalar(attr::WCT_HLIMIT)
            .map(attr::parse_duration_spec)
            .transpose()
            .map_err(|message| SpecError::InvalidValue {
                name: attr::WCT_HLIMIT,
                message,
            })?;

        let (priority, cpus) =
            parse_native_specification(template.scalar(attr::NATIVE_SPECIFICATION).unwrap_or(""))?;
        if cpus > slots {
            return Err(SpecError::Unsatisfiable { cpus, slots });
        }

        Ok(Self {
            command: expand(command, wd),
            args,
            working_dir: working_dir.clone(),
            env,
            stdin: path(attr::INPUT_PATH)?,
            stdout: path(attr::OUTPUT_PATH)?,
            stderr: path(attr::ERROR_PATH)?,
            join_files: template.scalar(attr::JOIN_FILES) == Some("y"),
            hold: template.scalar(attr::JS_STATE) == Some(attr::JS_STATE_HOLD),
            wall_clock_limit,
            priority,
            cpus,
            name: template.scalar(attr::JOB_NAME).map(str::to_string),
        })
    }
}

/// Parse `priority=<int>` and `cpus=<n>` tokens. Defaults: priority 0, 1 cpu.
pub fn parse_native_specification(native: &str) -> Result<(i32, usize), SpecError> {
    let mut priority = 0;
    let mut cpus = 1;
    for token in native.split_whitespace() {
        let unsupported = || SpecError::UnsupportedNative(token.to_string());
        match token.split_once('=').ok_or_else(unsupported)? {
            ("priority", value) => priority = value.parse().map_err(|_| unsupported())?,
            ("cpus", value) => {
                cpus = value
                    .parse()
                    .ok()
                    .filter(|n: &usize| *n > 0)
                    .ok_or_else(unsupported)?;
            }
            _ => return Err(unsupported()),
        }
    }
    Ok((priority, cpus))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(scalars: &[(&str, &str)]) -> LocalTemplate {
        LocalTemplate {
            scalars: scalars
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            vectors: FxHashMap::default(),
        }
    }

    #[test]
    fn test_native_specification() {
        assert_eq!(parse_native_specification("").unwrap(), (0, 1));
        assert_eq!(parse_native_specification("priority=5").unwrap(), (5, 1));
        assert_eq!(
            parse_native_specification("cpus=2 priority=-3").unwrap(),
            (-3, 2)
        );
        assert!(matches!(
            parse_native_specification("--mem=4G"),
            Err(SpecError::UnsupportedNative(t)) if t == "--mem=4G"
        ));
        assert!(parse_native_specification("cpus=0").is_err());
        assert!(parse_native_specification("priority=high").is_err());
        assert!(parse_native_specification("queue=short").is_err());
    }

    #[test]
    fn test_missing_command() {
        assert_eq!(
            JobSpec::from_template(&LocalTemplate::default(), 0, 4),
            Err(SpecError::MissingCommand)
        );
    }

    #[test]
    fn test_missing_working_directory() {
        let t = template(&[
            (attr::REMOTE_COMMAND, "/bin/true"),
            (attr::WD, "/definitely/not/here"),
        ]);
        assert!(matches!(
            JobSpec::from_template(&t, 0, 4),
            Err(SpecError::MissingWorkingDirectory(_))
        ));
    }

    #[test]
    fn test_unsatisfiable_cpus() {
        let t = template(&[
            (attr::REMOTE_COMMAND, "/bin/true"),
            (attr::NATIVE_SPECIFICATION, "cpus=8"),
        ]);
        assert_eq!(
            JobSpec::from_template(&t, 0, 2),
            Err(SpecError::Unsatisfiable { cpus: 8, slots: 2 })
        );
    }

    #[test]
    fn test_paths_and_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().to_string_lossy().to_string();
        let mut t = template(&[
            (attr::REMOTE_COMMAND, "/bin/echo"),
            (attr::WD, wd.as_str()),
            (attr::OUTPUT_PATH, "node1:out.$drmaa_incr_ph$"),
            (attr::ERROR_PATH, ":/tmp/err.log"),
            (attr::JOIN_FILES, "y"),
            (attr::JS_STATE, attr::JS_STATE_HOLD),
            (attr::WCT_HLIMIT, "1:30"),
        ]);
        t.vectors.insert(
            attr::V_ARGV.to_string(),
            vec!["$drmaa_wd_ph$/in.$drmaa_incr_ph$".to_string()],
        );
        t.vectors
            .insert(attr::V_ENV.to_string(), vec!["STAGE=2".to_string()]);

        let spec = JobSpec::from_template(&t, 3, 4).unwrap();
        assert_eq!(spec.stdout, Some(dir.path().join("out.3")));
        assert_eq!(spec.stderr, Some(PathBuf::from("/tmp/err.log")));
        assert_eq!(spec.args, vec![format!("{wd}/in.3")]);
        assert_eq!(spec.env, vec![("STAGE".to_string(), "2".to_string())]);
        assert!(spec.join_files);
        assert!(spec.hold);
        assert_eq!(spec.wall_clock_limit, Some(Duration::from_secs(90)));
        assert_eq!((spec.priority, spec.cpus), (0, 1));
    }

    #[test]
    fn test_home_placeholder() {
        let mut t = template(&[(attr::REMOTE_COMMAND, "/bin/ls")]);
        t.vectors.insert(
            attr::V_ARGV.to_string(),
            vec!["$drmaa_home_dir$/data".to_string()],
        );

        let spec = JobSpec::from_template(&t, 0, 1).unwrap();
        match dirs::home_dir() {
            Some(home) => assert_eq!(spec.args, vec![format!("{}/data", home.display())]),
            None => assert_eq!(spec.args, vec!["$drmaa_home_dir$/data".to_string()]),
        }
    }
}
