//! Error types for the DRM boundary.

use thiserror::Error;

use crate::job::{Action, TemplateHandle};

/// Errors reported by a DRM implementation.
///
/// The message payloads carry the DRM's own diagnostic text; callers surface
/// them unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DrmError {
    /// The contact string does not name a DRM this implementation can reach.
    #[error("Unsupported contact string: {0}")]
    UnsupportedContact(String),

    /// `connect` was called on an already connected DRM.
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// An operation was attempted before `connect` or after `disconnect`.
    #[error("Not connected to a DRM")]
    NotConnected,

    /// The connection to the DRM was lost mid-operation.
    #[error("Connection to DRM lost: {0}")]
    ConnectionLost(String),

    /// The template handle is unknown to the DRM.
    #[error("Invalid template handle: {0}")]
    InvalidTemplate(TemplateHandle),

    /// The DRM rejected the format of an attribute value.
    #[error("Invalid value for attribute {name}: {message}")]
    InvalidAttributeValue { name: String, message: String },

    /// The DRM rejected a submission.
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// The job id is unknown to the DRM.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The action is not valid for the job's current state.
    #[error("Cannot {action} job {job_id}: {message}")]
    InvalidTransition {
        job_id: String,
        action: Action,
        message: String,
    },

    /// The job has not finished within the reap timeout.
    #[error("Exit information for job {0} not available yet")]
    ExitTimeout(String),

    /// An external scheduler command failed to run.
    #[error("Command failed: {command} - {message}")]
    Command { command: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DrmError {
    /// Whether this error means the DRM could not be reached at all.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            DrmError::ConnectionLost(_) | DrmError::NotConnected | DrmError::Command { .. }
        )
    }
}

/// Result type for DRM operations.
pub type DrmResult<T> = Result<T, DrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DrmError::InvalidTransition {
            job_id: "42.local".to_string(),
            action: Action::Suspend,
            message: "job is not running".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot suspend job 42.local: job is not running"
        );

        let err = DrmError::InvalidTemplate(TemplateHandle(7));
        assert_eq!(err.to_string(), "Invalid template handle: 7");
    }

    #[test]
    fn test_connection_failure_classification() {
        assert!(DrmError::ConnectionLost("reset".into()).is_connection_failure());
        assert!(DrmError::NotConnected.is_connection_failure());
        assert!(!DrmError::InvalidJob("1".into()).is_connection_failure());
        assert!(!DrmError::SubmissionRejected("no".into()).is_connection_failure());
    }
}
