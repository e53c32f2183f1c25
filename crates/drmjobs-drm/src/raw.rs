//! Raw status and exit codes as reported by a DRM.
//!
//! Both codes use DRMAA numbering so that adapters for different schedulers
//! speak one vocabulary. Interpreting them (mapping into job states) is the
//! caller's business; this module only defines the encodings.
//!
//! # Wait status encoding
//!
//! ```text
//!   -1              no record of the job
//!   -2              job aborted before it ever ran
//!   0x0000..=0xff00 exited, low byte 0, exit code in bits 8..16
//!   0x01..=0xff     terminated by the signal in the low 7 bits
//!                   (bit 0x80 = core dumped)
//!   anything else   unclear conditions
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// DRMAA program-state code returned by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawJobState(pub u32);

impl RawJobState {
    pub const UNDETERMINED: Self = Self(0x00);
    pub const QUEUED_ACTIVE: Self = Self(0x10);
    pub const SYSTEM_ON_HOLD: Self = Self(0x11);
    pub const USER_ON_HOLD: Self = Self(0x12);
    pub const USER_SYSTEM_ON_HOLD: Self = Self(0x13);
    pub const RUNNING: Self = Self(0x20);
    pub const SYSTEM_SUSPENDED: Self = Self(0x21);
    pub const USER_SUSPENDED: Self = Self(0x22);
    pub const USER_SYSTEM_SUSPENDED: Self = Self(0x23);
    pub const DONE: Self = Self(0x30);
    pub const FAILED: Self = Self(0x40);

    /// Whether the code is DONE or FAILED.
    pub fn is_terminal(self) -> bool {
        self == Self::DONE || self == Self::FAILED
    }
}

impl fmt::Display for RawJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Raw wait status returned when a finished job is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawWaitStatus(pub i32);

impl RawWaitStatus {
    /// The DRM holds no record of the job.
    pub const NO_RECORD: Self = Self(-1);
    /// The job was removed before it started running.
    pub const ABORTED: Self = Self(-2);

    /// Encode a regular exit with the given code.
    pub fn exited(code: u8) -> Self {
        Self(i32::from(code) << 8)
    }

    /// Encode termination by signal.
    pub fn signaled(signal: i32) -> Self {
        Self(signal & 0x7f)
    }

    /// Exit code, if the job exited regularly.
    pub fn exit_code(self) -> Option<i32> {
        if (0..=0xff00).contains(&self.0) && self.0 & 0xff == 0 {
            Some((self.0 >> 8) & 0xff)
        } else {
            None
        }
    }

    /// Terminating signal, if the job was killed by one.
    pub fn term_signal(self) -> Option<i32> {
        let signal = self.0 & 0x7f;
        if (1..=0xff).contains(&self.0) && (1..=0x7e).contains(&signal) {
            Some(signal)
        } else {
            None
        }
    }

    /// Whether the termination left a core dump.
    pub fn core_dumped(self) -> bool {
        self.term_signal().is_some() && self.0 & 0x80 != 0
    }
}

impl fmt::Display for RawWaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion record of a reaped job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExit {
    /// Raw wait status.
    pub status: RawWaitStatus,
    /// Resource usage reported by the DRM (name → value).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_usage: BTreeMap<String, String>,
}

impl RawExit {
    /// Create a record without resource usage.
    pub fn new(status: RawWaitStatus) -> Self {
        Self {
            status,
            resource_usage: BTreeMap::new(),
        }
    }

    /// Add a resource-usage entry.
    pub fn with_usage(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_usage.insert(name.into(), value.into());
        self
    }
}
