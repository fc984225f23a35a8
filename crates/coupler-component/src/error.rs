//! Component layer errors.
//!
//! Two error types cross the component boundary:
//!
//! - [`CapabilityError`]: raised by registry operations (`declare`,
//!   `acquire`, `publish`). It is `Clone` because one failure is delivered
//!   to every waiter of a capability.
//! - [`ComponentError`]: what a component's own hooks return. A runner turns
//!   it into the component's terminal [`FailureCause`].
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`CapabilityError::NotFound`] | `CAPABILITY_NOT_FOUND` | No |
//! | [`CapabilityError::Failed`] | `CAPABILITY_FAILED` | No |
//! | [`CapabilityError::Duplicate`] | `CAPABILITY_DUPLICATE` | No |
//! | [`CapabilityError::AlreadyPublished`] | `CAPABILITY_ALREADY_PUBLISHED` | No |
//! | [`CapabilityError::NotOwner`] | `CAPABILITY_NOT_OWNER` | No |
//! | [`ComponentError::ExecutionFailed`] | `COMPONENT_EXECUTION_FAILED` | Yes |
//! | [`ComponentError::MissingParameter`] | `COMPONENT_MISSING_PARAMETER` | No |
//! | [`ComponentError::InvalidParameter`] | `COMPONENT_INVALID_PARAMETER` | No |
//! | [`ComponentError::Artifact`] | `COMPONENT_ARTIFACT` | Yes |
//! | [`ComponentError::Capability`] | `COMPONENT_CAPABILITY` | No |
//! | [`ComponentError::Panicked`] | `COMPONENT_PANICKED` | No |

use coupler_types::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Root cause of a component failure.
///
/// Failures propagate through the dependency chain unchanged: when a
/// consumer dies because its input failed, its own cause is the producer's
/// cause, so the run summary always names where things went wrong first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCause {
    /// Component (or process) where the failure originated.
    pub origin: String,
    /// Human-readable description.
    pub message: String,
}

impl FailureCause {
    #[must_use]
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.origin, self.message)
    }
}

/// Registry operation error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CapabilityError {
    /// No configured component declares this capability.
    ///
    /// Raised immediately, without blocking. Callers may treat it as an
    /// intentionally omitted optional input.
    #[error("capability not found: {name}")]
    NotFound { name: String },

    /// The producer terminated without publishing.
    #[error("capability '{name}' failed ({cause})")]
    Failed { name: String, cause: FailureCause },

    /// A second component tried to declare an existing name.
    #[error("duplicate definition of capability '{name}' (declared by {existing}, redeclared by {requested})")]
    Duplicate {
        name: String,
        existing: String,
        requested: String,
    },

    /// `publish` was called twice for one capability.
    #[error("capability '{name}' was already published")]
    AlreadyPublished { name: String },

    /// A component tried to publish data it does not own.
    #[error("component {component} does not own capability '{name}'")]
    NotOwner { name: String, component: String },
}

impl CapabilityError {
    /// Name of the capability the error refers to.
    #[must_use]
    pub fn capability(&self) -> &str {
        match self {
            Self::NotFound { name }
            | Self::Failed { name, .. }
            | Self::Duplicate { name, .. }
            | Self::AlreadyPublished { name }
            | Self::NotOwner { name, .. } => name,
        }
    }

    /// Returns `true` for [`CapabilityError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl ErrorCode for CapabilityError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "CAPABILITY_NOT_FOUND",
            Self::Failed { .. } => "CAPABILITY_FAILED",
            Self::Duplicate { .. } => "CAPABILITY_DUPLICATE",
            Self::AlreadyPublished { .. } => "CAPABILITY_ALREADY_PUBLISHED",
            Self::NotOwner { .. } => "CAPABILITY_NOT_OWNER",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Error returned by a component's `declare`, `bind` or `run` hooks.
#[derive(Debug, Clone, Error)]
pub enum ComponentError {
    /// The model run itself failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A required parameter is absent.
    #[error("missing parameter: {name}")]
    MissingParameter { name: String },

    /// A parameter could not be interpreted.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    /// Reading or writing a durable artifact failed.
    #[error("artifact {}: {message}", .path.display())]
    Artifact { path: PathBuf, message: String },

    /// A registry operation failed and the component did not handle it.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The component panicked while running.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl ComponentError {
    /// Builds an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Builds an artifact error from an I/O failure.
    pub fn artifact(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::Artifact {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Resolves the root cause of this error as seen from `component`.
    ///
    /// A failed input keeps its producer's cause; anything else originates
    /// in `component` itself.
    #[must_use]
    pub fn root_cause(&self, component: &str) -> FailureCause {
        match self {
            Self::Capability(CapabilityError::Failed { cause, .. }) => cause.clone(),
            other => FailureCause::new(component, other.to_string()),
        }
    }
}

impl ErrorCode for ComponentError {
    fn code(&self) -> &'static str {
        match self {
            Self::ExecutionFailed(_) => "COMPONENT_EXECUTION_FAILED",
            Self::MissingParameter { .. } => "COMPONENT_MISSING_PARAMETER",
            Self::InvalidParameter { .. } => "COMPONENT_INVALID_PARAMETER",
            Self::Artifact { .. } => "COMPONENT_ARTIFACT",
            Self::Capability(_) => "COMPONENT_CAPABILITY",
            Self::Panicked(_) => "COMPONENT_PANICKED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::ExecutionFailed(_) | Self::Artifact { .. })
    }
}
