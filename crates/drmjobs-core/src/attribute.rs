//! Job template attributes.
//!
//! Attribute identity is a closed enumeration: [`ScalarAttribute`] for
//! single-valued attributes and [`VectorAttribute`] for list-valued ones.
//! Each variant knows its wire name and the [`ValueShape`] its value must
//! have. Names outside the vocabulary are rejected, never ignored: a dropped
//! wall-clock limit would silently leave the job under the DRM's default
//! policy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use drmjobs_drm::attr;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Expected format of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// Any string, including empty.
    Text,
    /// Any non-empty string.
    NonEmpty,
    /// One of two literal values.
    Flag { yes: &'static str, no: &'static str },
    /// One of a fixed set of literal values.
    Choice(&'static [&'static str]),
    /// DRMAA absolute time `[[[[CC]YY/]MM/]DD] hh:mm[:ss] [{-|+}UU:uu]`.
    Time,
    /// DRMAA duration `[[h:]m:]s`.
    Duration,
    /// DRMAA path `[hostname]:file_path`.
    Path,
    /// Any combination of the letters `e`, `i`, `o`.
    Transfer,
    /// List of arbitrary strings.
    List,
    /// List of `NAME=value` entries.
    Environment,
    /// List of email addresses.
    EmailList,
}

impl ValueShape {
    /// Check a scalar value against this shape.
    pub fn check_scalar(self, value: &str) -> Result<(), String> {
        match self {
            ValueShape::Text => Ok(()),
            ValueShape::NonEmpty if value.trim().is_empty() => Err("value is empty".to_string()),
            ValueShape::NonEmpty => Ok(()),
            ValueShape::Flag { yes, no } if value == yes || value == no => Ok(()),
            ValueShape::Flag { yes, no } => Err(format!("expected '{yes}' or '{no}', got '{value}'")),
            ValueShape::Choice(options) if options.contains(&value) => Ok(()),
            ValueShape::Choice(options) => Err(format!(
                "expected one of {}, got '{value}'",
                options.join(", ")
            )),
            ValueShape::Time => attr::validate_time_spec(value),
            ValueShape::Duration => attr::parse_duration_spec(value).map(|_| ()),
            ValueShape::Path => attr::parse_path_spec(value).map(|_| ()),
            ValueShape::Transfer => {
                let mut seen = [false; 3];
                for c in value.chars() {
                    let slot = match c {
                        'e' => 0,
                        'i' => 1,
                        'o' => 2,
                        other => return Err(format!("unexpected transfer flag '{other}'")),
                    };
                    if std::mem::replace(&mut seen[slot], true) {
                        return Err(format!("transfer flag '{c}' repeated"));
                    }
                }
                Ok(())
            }
            ValueShape::List | ValueShape::Environment | ValueShape::EmailList => {
                Err("a list attribute cannot take a single value".to_string())
            }
        }
    }

    /// Check a list value against this shape.
    pub fn check_vector(self, values: &[String]) -> Result<(), String> {
        match self {
            ValueShape::List => Ok(()),
            ValueShape::Environment => values.iter().try_for_each(|entry| {
                match entry.split_once('=') {
                    Some((name, _)) if !name.is_empty() => Ok(()),
                    _ => Err(format!("'{entry}' is not NAME=value")),
                }
            }),
            ValueShape::EmailList => values.iter().try_for_each(|entry| {
                match entry.split_once('@') {
                    Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok(()),
                    _ => Err(format!("'{entry}' is not an email address")),
                }
            }),
            _ => Err("a scalar attribute cannot take a list".to_string()),
        }
    }
}

/// Single-valued job template attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarAttribute {
    RemoteCommand,
    JobSubmissionState,
    WorkingDirectory,
    JobCategory,
    NativeSpecification,
    BlockEmail,
    StartTime,
    JobName,
    InputPath,
    OutputPath,
    ErrorPath,
    JoinFiles,
    TransferFiles,
    DeadlineTime,
    WallClockHardLimit,
    WallClockSoftLimit,
    DurationHardLimit,
    DurationSoftLimit,
}

impl ScalarAttribute {
    /// Every scalar attribute, in DRMAA declaration order.
    pub const ALL: [ScalarAttribute; 18] = [
        ScalarAttribute::RemoteCommand,
        ScalarAttribute::JobSubmissionState,
        ScalarAttribute::WorkingDirectory,
        ScalarAttribute::JobCategory,
        ScalarAttribute::NativeSpecification,
        ScalarAttribute::BlockEmail,
        ScalarAttribute::StartTime,
        ScalarAttribute::JobName,
        ScalarAttribute::InputPath,
        ScalarAttribute::OutputPath,
        ScalarAttribute::ErrorPath,
        ScalarAttribute::JoinFiles,
        ScalarAttribute::TransferFiles,
        ScalarAttribute::DeadlineTime,
        ScalarAttribute::WallClockHardLimit,
        ScalarAttribute::WallClockSoftLimit,
        ScalarAttribute::DurationHardLimit,
        ScalarAttribute::DurationSoftLimit,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            ScalarAttribute::RemoteCommand => attr::REMOTE_COMMAND,
            ScalarAttribute::JobSubmissionState => attr::JS_STATE,
            ScalarAttribute::WorkingDirectory => attr::WD,
            ScalarAttribute::JobCategory => attr::JOB_CATEGORY,
            ScalarAttribute::NativeSpecification => attr::NATIVE_SPECIFICATION,
            ScalarAttribute::BlockEmail => attr::BLOCK_EMAIL,
            ScalarAttribute::StartTime => attr::START_TIME,
            ScalarAttribute::JobName => attr::JOB_NAME,
            ScalarAttribute::InputPath => attr::INPUT_PATH,
            ScalarAttribute::OutputPath => attr::OUTPUT_PATH,
            ScalarAttribute::ErrorPath => attr::ERROR_PATH,
            ScalarAttribute::JoinFiles => attr::JOIN_FILES,
            ScalarAttribute::TransferFiles => attr::TRANSFER_FILES,
            ScalarAttribute::DeadlineTime => attr::DEADLINE_TIME,
            ScalarAttribute::WallClockHardLimit => attr::WCT_HLIMIT,
            ScalarAttribute::WallClockSoftLimit => attr::WCT_SLIMIT,
            ScalarAttribute::DurationHardLimit => attr::DURATION_HLIMIT,
            ScalarAttribute::DurationSoftLimit => attr::DURATION_SLIMIT,
        }
    }

    /// Expected value shape.
    pub fn shape(self) -> ValueShape {
        match self {
            ScalarAttribute::RemoteCommand | ScalarAttribute::WorkingDirectory => {
                ValueShape::NonEmpty
            }
            ScalarAttribute::JobSubmissionState => {
                ValueShape::Choice(&[attr::JS_STATE_HOLD, attr::JS_STATE_ACTIVE])
            }
            ScalarAttribute::JobCategory
            | ScalarAttribute::NativeSpecification
            | ScalarAttribute::JobName => ValueShape::Text,
            ScalarAttribute::BlockEmail => ValueShape::Flag { yes: "1", no: "0" },
            ScalarAttribute::JoinFiles => ValueShape::Flag { yes: "y", no: "n" },
            ScalarAttribute::StartTime | ScalarAttribute::DeadlineTime => ValueShape::Time,
            ScalarAttribute::InputPath | ScalarAttribute::OutputPath | ScalarAttribute::ErrorPath => {
                ValueShape::Path
            }
            ScalarAttribute::TransferFiles => ValueShape::Transfer,
            ScalarAttribute::WallClockHardLimit
            | ScalarAttribute::WallClockSoftLimit
            | ScalarAttribute::DurationHardLimit
            | ScalarAttribute::DurationSoftLimit => ValueShape::Duration,
        }
    }

    /// Validate a value for this attribute.
    pub fn validate(self, value: &str) -> CoreResult<()> {
        self.shape()
            .check_scalar(value)
            .map_err(|message| CoreError::AttributeValue {
                name: self.name().to_string(),
                message,
            })
    }
}

impl fmt::Display for ScalarAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScalarAttribute {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScalarAttribute::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| CoreError::UnknownAttribute(s.to_string()))
    }
}

/// List-valued job template attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VectorAttribute {
    Argv,
    Environment,
    Email,
}

impl VectorAttribute {
    /// Every vector attribute.
    pub const ALL: [VectorAttribute; 3] = [
        VectorAttribute::Argv,
        VectorAttribute::Environment,
        VectorAttribute::Email,
    ];

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            VectorAttribute::Argv => attr::V_ARGV,
            VectorAttribute::Environment => attr::V_ENV,
            VectorAttribute::Email => attr::V_EMAIL,
        }
    }

    /// Expected value shape.
    pub fn shape(self) -> ValueShape {
        match self {
            VectorAttribute::Argv => ValueShape::List,
            VectorAttribute::Environment => ValueShape::Environment,
            VectorAttribute::Email => ValueShape::EmailList,
        }
    }

    /// Validate a list for this attribute.
    pub fn validate(self, values: &[String]) -> CoreResult<()> {
        self.shape()
            .check_vector(values)
            .map_err(|message| CoreError::AttributeValue {
                name: self.name().to_string(),
                message,
            })
    }
}

impl fmt::Display for VectorAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VectorAttribute {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VectorAttribute::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| CoreError::UnknownAttribute(s.to_string()))
    }
}

/// Either kind of attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttributeName {
    Scalar(ScalarAttribute),
    Vector(VectorAttribute),
}

impl AttributeName {
    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            AttributeName::Scalar(a) => a.name(),
            AttributeName::Vector(a) => a.name(),
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value stored for an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Scalar(String),
    Vector(Vec<String>),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Scalar(value) => write!(f, "{value}"),
            AttributeValue::Vector(values) => write!(f, "[{}]", values.join(", ")),
        }
    }
}

/// Attribute values of one template, keyed by attribute.
///
/// The key type guarantees the shape pairing: scalar attributes always hold
/// [`AttributeValue::Scalar`], vector attributes [`AttributeValue::Vector`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    values: BTreeMap<AttributeName, AttributeValue>,
}

impl AttributeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a scalar value.
    pub fn set_scalar(&mut self, attribute: ScalarAttribute, value: impl Into<String>) -> CoreResult<()> {
        let value = value.into();
        attribute.validate(&value)?;
        self.values
            .insert(AttributeName::Scalar(attribute), AttributeValue::Scalar(value));
        Ok(())
    }

    /// Validate and store a list value.
    pub fn set_vector(&mut self, attribute: VectorAttribute, values: Vec<String>) -> CoreResult<()> {
        attribute.validate(&values)?;
        self.values
            .insert(AttributeName::Vector(attribute), AttributeValue::Vector(values));
        Ok(())
    }

    /// Remove a scalar value, returning it.
    pub fn unset_scalar(&mut self, attribute: ScalarAttribute) -> Option<String> {
        match self.values.remove(&AttributeName::Scalar(attribute)) {
            Some(AttributeValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    /// Scalar value, if set.
    pub fn scalar(&self, attribute: ScalarAttribute) -> Option<&str> {
        match self.values.get(&AttributeName::Scalar(attribute)) {
            Some(AttributeValue::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    /// List value, if set.
    pub fn vector(&self, attribute: VectorAttribute) -> Option<&[String]> {
        match self.values.get(&AttributeName::Vector(attribute)) {
            Some(AttributeValue::Vector(values)) => Some(values),
            _ => None,
        }
    }

    /// Iterate over set attributes in vocabulary order.
    pub fn iter(&self) -> impl Iterator<Item = (AttributeName, &AttributeValue)> {
        self.values.iter().map(|(name, value)| (*name, value))
    }

    /// Number of attributes set.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Wire names of every supported attribute, scalar first.
pub fn supported_attribute_names() -> Vec<&'static str> {
    ScalarAttribute::ALL
        .iter()
        .map(|a| a.name())
        .chain(VectorAttribute::ALL.iter().map(|a| a.name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for attribute in ScalarAttribute::ALL {
            assert_eq!(attribute.name().parse::<ScalarAttribute>().unwrap(), attribute);
        }
        for attribute in VectorAttribute::ALL {
            assert_eq!(attribute.name().parse::<VectorAttribute>().unwrap(), attribute);
        }
    }

    #[test]
    fn test_unknown_names() {
        assert!(matches!(
            "drmaa_walltime".parse::<ScalarAttribute>(),
            Err(CoreError::UnknownAttribute(name)) if name == "drmaa_walltime"
        ));
        // Vector names are not scalar names and vice versa.
        assert!("drmaa_v_env".parse::<ScalarAttribute>().is_err());
        assert!("drmaa_wd".parse::<VectorAttribute>().is_err());
    }

    #[test]
    fn test_supported_names() {
        let names = supported_attribute_names();
        assert_eq!(names.len(), 21);
        assert_eq!(names[0], "drmaa_remote_command");
        assert!(names.contains(&"drmaa_wct_hlimit"));
        assert_eq!(names[names.len() - 1], "drmaa_v_email");
    }

    #[test]
    fn test_scalar_shapes() {
        assert!(ScalarAttribute::JoinFiles.validate("y").is_ok());
        assert!(ScalarAttribute::JoinFiles.validate("yes").is_err());
        assert!(ScalarAttribute::BlockEmail.validate("1").is_ok());
        assert!(ScalarAttribute::BlockEmail.validate("y").is_err());
        assert!(ScalarAttribute::JobSubmissionState.validate("drmaa_hold").is_ok());
        assert!(ScalarAttribute::JobSubmissionState.validate("hold").is_err());
        assert!(ScalarAttribute::WallClockHardLimit.validate("01:00:00").is_ok());
        assert!(ScalarAttribute::WallClockHardLimit.validate("one hour").is_err());
        assert!(ScalarAttribute::StartTime.validate("2024/03/01 10:00").is_ok());
        assert!(ScalarAttribute::StartTime.validate("10am").is_err());
        assert!(ScalarAttribute::OutputPath.validate("[void]:/dev/null").is_ok());
        assert!(ScalarAttribute::OutputPath.validate("/dev/null").is_err());
        assert!(ScalarAttribute::TransferFiles.validate("eio").is_ok());
        assert!(ScalarAttribute::TransferFiles.validate("").is_ok());
        assert!(ScalarAttribute::TransferFiles.validate("ee").is_err());
        assert!(ScalarAttribute::TransferFiles.validate("x").is_err());
        assert!(ScalarAttribute::RemoteCommand.validate(" ").is_err());
        assert!(ScalarAttribute::NativeSpecification.validate("").is_ok());
    }

    #[test]
    fn test_vector_shapes() {
        let env = vec!["PATH=/bin".to_string(), "EMPTY=".to_string()];
        assert!(VectorAttribute::Environment.validate(&env).is_ok());
        assert!(
            VectorAttribute::Environment
                .validate(&["=value".to_string()])
                .is_err()
        );
        assert!(
            VectorAttribute::Email
                .validate(&["ops@example.org".to_string()])
                .is_ok()
        );
        assert!(VectorAttribute::Email.validate(&["ops".to_string()]).is_err());
        assert!(VectorAttribute::Argv.validate(&[]).is_ok());
    }

    #[test]
    fn test_attribute_set() {
        let mut set = AttributeSet::new();
        assert!(set.is_empty());

        set.set_scalar(ScalarAttribute::JobName, "align").unwrap();
        set.set_vector(VectorAttribute::Argv, vec!["-v".into(), "in.nii".into()])
            .unwrap();
        assert_eq!(set.scalar(ScalarAttribute::JobName), Some("align"));
        assert_eq!(
            set.vector(VectorAttribute::Argv).unwrap(),
            &["-v".to_string(), "in.nii".to_string()]
        );
        assert_eq!(set.len(), 2);

        // Rejected values leave the previous value in place.
        set.set_scalar(ScalarAttribute::JoinFiles, "y").unwrap();
        assert!(set.set_scalar(ScalarAttribute::JoinFiles, "maybe").is_err());
        assert_eq!(set.scalar(ScalarAttribute::JoinFiles), Some("y"));
    }
}
