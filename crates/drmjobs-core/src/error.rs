//! Error handling for the job-lifecycle core.

use drmjobs_drm::{Action, DrmError, JobId};
use thiserror::Error;

use crate::template::TemplateId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur during session, template and job operations.
///
/// Every variant that originates in a DRM rejection carries the DRM's own
/// diagnostic text.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No active session, a second session, or a failed session transition.
    #[error("Session error: {0}")]
    Session(String),

    /// Unknown, already deleted or undefined template id.
    #[error("Invalid job template id: {0}")]
    InvalidTemplate(TemplateId),

    /// Attribute name outside the recognized vocabulary.
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// Attribute value rejected, locally or by the DRM.
    #[error("Invalid value for attribute {name}: {message}")]
    AttributeValue { name: String, message: String },

    /// The DRM rejected a submission, or accepted only part of a bulk request.
    #[error(
        "Job submission failed ({} of {requested} accepted): {message}",
        .accepted.len()
    )]
    Submission {
        message: String,
        requested: u32,
        /// Jobs the DRM did accept; they are left running.
        accepted: Vec<JobId>,
    },

    /// The DRM rejected a control action.
    #[error("Cannot {action} job {job_id}: {message}")]
    Control {
        job_id: JobId,
        action: Action,
        message: String,
    },

    /// The DRM could not be reached.
    #[error("Lost connection to DRM: {0}")]
    Connection(String),

    /// A wait exceeded its configured budget.
    #[error("Timeout waiting for job {0}")]
    Timeout(JobId),

    /// Any other DRM failure.
    #[error("DRM error: {0}")]
    Drm(DrmError),
}

impl CoreError {
    /// Submission failure with nothing accepted.
    pub(crate) fn rejected(message: impl Into<String>, requested: u32) -> Self {
        CoreError::Submission {
            message: message.into(),
            requested,
            accepted: Vec::new(),
        }
    }

    /// Map a DRM failure that is not specific to one operation.
    pub(crate) fn from_drm(e: DrmError) -> Self {
        if e.is_connection_failure() {
            CoreError::Connection(e.to_string())
        } else {
            CoreError::Drm(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidTemplate(TemplateId(3));
        assert_eq!(err.to_string(), "Invalid job template id: 3");

        let err = CoreError::Submission {
            message: "queue limit reached".to_string(),
            requested: 5,
            accepted: vec![JobId::new("1"), JobId::new("2")],
        };
        assert_eq!(
            err.to_string(),
            "Job submission failed (2 of 5 accepted): queue limit reached"
        );

        let err = CoreError::Control {
            job_id: JobId::new("7"),
            action: Action::Resume,
            message: "job is not suspended".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot resume job 7: job is not suspended");
    }

    #[test]
    fn test_from_drm_classification() {
        assert!(matches!(
            CoreError::from_drm(DrmError::ConnectionLost("eof".into())),
            CoreError::Connection(_)
        ));
        assert!(matches!(
            CoreError::from_drm(DrmError::InvalidJob("9".into())),
            CoreError::Drm(_)
        ));
    }
}
