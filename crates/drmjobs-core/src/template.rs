//! Job templates.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use drmjobs_drm::TemplateHandle;
use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeSet, ScalarAttribute, VectorAttribute};

/// Session-local identifier of a job template.
///
/// Ids are assigned from 0 upwards and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub i64);

impl TemplateId {
    /// The "no template" sentinel.
    pub const UNDEFINED: Self = Self(-1);

    /// Whether this is the undefined sentinel (or any negative id).
    pub fn is_undefined(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job description: command, arguments and attributes, bound to a
/// DRM-side template.
///
/// Templates stay mutable after submission; changing one that already
/// produced jobs only affects later submissions and is logged as a warning.
#[derive(Debug)]
pub struct JobTemplate {
    id: TemplateId,
    handle: TemplateHandle,
    attributes: AttributeSet,
    created_at: DateTime<Utc>,
    submissions: AtomicU32,
}

impl JobTemplate {
    pub(crate) fn new(id: TemplateId, handle: TemplateHandle) -> Self {
        Self {
            id,
            handle,
            attributes: AttributeSet::new(),
            created_at: Utc::now(),
            submissions: AtomicU32::new(0),
        }
    }

    /// Local template id.
    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// DRM-side template handle.
    pub fn handle(&self) -> TemplateHandle {
        self.handle
    }

    /// Attribute values set so far.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut AttributeSet {
        &mut self.attributes
    }

    /// Command to run, if set.
    pub fn command(&self) -> Option<&str> {
        self.attributes.scalar(ScalarAttribute::RemoteCommand)
    }

    /// Command arguments; empty if unset.
    pub fn args(&self) -> &[String] {
        self.attributes.vector(VectorAttribute::Argv).unwrap_or(&[])
    }

    /// When the template was allocated.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of jobs submitted from this template.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::Relaxed)
    }

    pub(crate) fn record_submissions(&self, count: u32) {
        self.submissions.fetch_add(count, Ordering::Relaxed);
    }
}

impl fmt::Display for JobTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Job template {} (created {}, {} submission(s))",
            self.id,
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.submissions()
        )?;
        if self.attributes.is_empty() {
            return writeln!(f, "  (no attributes set)");
        }
        let width = self
            .attributes
            .iter()
            .map(|(name, _)| name.name().len())
            .max()
            .unwrap_or(0);
        for (name, value) in self.attributes.iter() {
            writeln!(f, "  {:width$}  {}", name.name(), value)?;
        }
        Ok(())
    }
}
