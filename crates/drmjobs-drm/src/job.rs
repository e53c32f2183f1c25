//! Job and template identifiers, and control actions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// DRM-assigned identifier of a submitted job.
///
/// Opaque to this crate: only the DRM that issued it can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handle of a DRM-side job template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateHandle(pub u64);

impl fmt::Display for TemplateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Control action sent against a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Stop the job.
    Suspend,
    /// (Re)start a suspended job.
    Resume,
    /// Put a queued job on hold.
    Hold,
    /// Release the hold on a job.
    Release,
    /// Kill the job.
    Terminate,
}

impl Action {
    /// All actions, in DRMAA order.
    pub const ALL: [Action; 5] = [
        Action::Suspend,
        Action::Resume,
        Action::Hold,
        Action::Release,
        Action::Terminate,
    ];

    /// Lowercase action name.
    pub fn name(self) -> &'static str {
        match self {
            Action::Suspend => "suspend",
            Action::Resume => "resume",
            Action::Hold => "hold",
            Action::Release => "release",
            Action::Terminate => "terminate",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown action '{s}' (expected one of suspend, resume, hold, release, terminate)"))
    }
}
