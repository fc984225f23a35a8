//! Dispatcher errors.
//!
//! # Error Codes
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`DispatchError::Config`] | `DISPATCH_CONFIG` | No |
//! | [`DispatchError::Transport`] | `DISPATCH_TRANSPORT` | depends |
//! | [`DispatchError::ComponentsFailed`] | `DISPATCH_COMPONENTS_FAILED` | Yes |
//! | [`DispatchError::Deadlock`] | `DISPATCH_DEADLOCK` | No |
//!
//! `Transport` inherits recoverability from the wrapped
//! [`TransportError`].

use crate::config::ConfigError;
use crate::dispatcher::BlockedOn;
use crate::transport::TransportError;
use coupler_types::ErrorCode;
use thiserror::Error;

/// Run-level failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Structurally invalid configuration; nothing ran.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Processes could not be coordinated.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// At least one component failed.
    #[error("{failed} of {total} components failed")]
    ComponentsFailed {
        failed: usize,
        total: usize,
        /// One line per failed component with its root cause.
        summary: Vec<String>,
    },

    /// Every live runner was blocked with no forward progress.
    #[error("deadlock detected: {}", describe(.blocked))]
    Deadlock { blocked: Vec<BlockedOn> },
}

fn describe(blocked: &[BlockedOn]) -> String {
    blocked
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl DispatchError {
    /// Returns `true` for errors raised before any component ran.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl ErrorCode for DispatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "DISPATCH_CONFIG",
            Self::Transport(_) => "DISPATCH_TRANSPORT",
            Self::ComponentsFailed { .. } => "DISPATCH_COMPONENTS_FAILED",
            Self::Deadlock { .. } => "DISPATCH_DEADLOCK",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_recoverable(),
            Self::ComponentsFailed { .. } => true,
            Self::Config(_) | Self::Deadlock { .. } => false,
        }
    }
}
