//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for a job session.
///
/// Governs how `wait` polls the DRM. Defaults are set in code and can be
/// overridden from `DRMJOBS_*` environment variables or a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Initial status polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Upper bound for the backed-off polling interval in milliseconds.
    pub max_poll_interval_ms: u64,

    /// Maximum time to wait for a job (seconds). 0 waits forever.
    pub max_wait_time_secs: u64,

    /// Consecutive failed status queries tolerated before a wait gives up.
    pub max_query_failures: u32,

    /// How long a single reap call may block in the DRM (milliseconds).
    pub reap_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_poll_interval_ms: 5_000,
            max_wait_time_secs: 86400, // 24 hours
            max_query_failures: 5,
            reap_timeout_ms: 1_000,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `DRMJOBS_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognized keys: `DRMJOBS_POLL_INTERVAL_MS`, `DRMJOBS_MAX_POLL_INTERVAL_MS`,
    /// `DRMJOBS_MAX_WAIT_SECS`, `DRMJOBS_MAX_QUERY_FAILURES`,
    /// `DRMJOBS_REAP_TIMEOUT_MS`. Unparseable values are ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            target: &mut T,
        ) {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse() {
                    Ok(value) => *target = value,
                    Err(_) => warn!("Ignoring {}={:?}: not a number", key, raw),
                }
            }
        }

        read(&lookup, "DRMJOBS_POLL_INTERVAL_MS", &mut self.poll_interval_ms);
        read(&lookup, "DRMJOBS_MAX_POLL_INTERVAL_MS", &mut self.max_poll_interval_ms);
        read(&lookup, "DRMJOBS_MAX_WAIT_SECS", &mut self.max_wait_time_secs);
        read(&lookup, "DRMJOBS_MAX_QUERY_FAILURES", &mut self.max_query_failures);
        read(&lookup, "DRMJOBS_REAP_TIMEOUT_MS", &mut self.reap_timeout_ms);
        self
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub(crate) fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms.max(self.poll_interval_ms).max(1))
    }

    pub(crate) fn max_wait(&self) -> Option<Duration> {
        (self.max_wait_time_secs > 0).then(|| Duration::from_secs(self.max_wait_time_secs))
    }

    pub(crate) fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }
}
