//! Configuration errors.
//!
//! Every variant is fatal before any component runs.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`ConfigError::ReadFile`] | `CONFIG_READ_FILE` | Yes |
//! | [`ConfigError::ParseToml`] | `CONFIG_PARSE_TOML` | No |
//! | [`ConfigError::InvalidSection`] | `CONFIG_INVALID_SECTION` | No |
//! | [`ConfigError::UnsupportedValue`] | `CONFIG_UNSUPPORTED_VALUE` | No |
//! | [`ConfigError::DuplicateGlobal`] | `CONFIG_DUPLICATE_GLOBAL` | No |
//! | [`ConfigError::InvalidEnvVar`] | `CONFIG_INVALID_ENV_VAR` | No |
//! | [`ConfigError::InvalidGlobal`] | `CONFIG_INVALID_GLOBAL` | No |
//! | [`ConfigError::UnknownKind`] | `CONFIG_UNKNOWN_KIND` | No |
//! | [`ConfigError::Component`] | `CONFIG_COMPONENT` | No |
//! | [`ConfigError::InvalidAssignment`] | `CONFIG_INVALID_ASSIGNMENT` | No |
//! | [`ConfigError::Remote`] | `CONFIG_REMOTE` | No |

use coupler_component::ComponentError;
use coupler_types::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A top-level entry is not a table.
    #[error("section '{section}' must be a table")]
    InvalidSection { section: String },

    /// A parameter value cannot be flattened to a string.
    #[error("section '{section}': parameter '{key}' has an unsupported type (nested tables are not allowed)")]
    UnsupportedValue { section: String, key: String },

    /// More than one section is named `Global` (ignoring case).
    #[error("more than one global section ('{first}' and '{second}')")]
    DuplicateGlobal { first: String, second: String },

    /// Invalid environment variable value.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },

    /// Invalid value in the global section.
    #[error("invalid global setting '{key}': {message}")]
    InvalidGlobal { key: String, message: String },

    /// No constructor registered for the section's kind.
    #[error("section '{section}': unknown component kind '{kind}'")]
    UnknownKind { section: String, kind: String },

    /// A component rejected its declarations or parameters.
    #[error("component {component}: {source}")]
    Component {
        component: String,
        #[source]
        source: ComponentError,
    },

    /// A component cannot be placed on a process.
    #[error("component {component}: {message}")]
    InvalidAssignment { component: String, message: String },

    /// Another process of a distributed run rejected the configuration.
    #[error("configuration rejected: {reason}")]
    Remote { reason: String },
}

impl ConfigError {
    /// Creates a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Creates a parse TOML error.
    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid env var error.
    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid global setting error.
    pub fn invalid_global(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidGlobal {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Wraps a component hook failure.
    pub fn component(component: impl ToString, source: impl Into<ComponentError>) -> Self {
        Self::Component {
            component: component.to_string(),
            source: source.into(),
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "CONFIG_READ_FILE",
            Self::ParseToml { .. } => "CONFIG_PARSE_TOML",
            Self::InvalidSection { .. } => "CONFIG_INVALID_SECTION",
            Self::UnsupportedValue { .. } => "CONFIG_UNSUPPORTED_VALUE",
            Self::DuplicateGlobal { .. } => "CONFIG_DUPLICATE_GLOBAL",
            Self::InvalidEnvVar { .. } => "CONFIG_INVALID_ENV_VAR",
            Self::InvalidGlobal { .. } => "CONFIG_INVALID_GLOBAL",
            Self::UnknownKind { .. } => "CONFIG_UNKNOWN_KIND",
            Self::Component { .. } => "CONFIG_COMPONENT",
            Self::InvalidAssignment { .. } => "CONFIG_INVALID_ASSIGNMENT",
            Self::Remote { .. } => "CONFIG_REMOTE",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::ReadFile { .. })
    }
}
