//! Component lifecycle.
//!
//! # State Machine
//!
//! ```text
//!              bind(params)            launch()
//!   Created ─────────────────► ParamsBound ─────────► Running ──┬──► Succeeded
//!      │                           │                            └──► Failed
//!      │ declare(Construct)        │ declare(Bound)
//!      ▼                           ▼          skip (cached output reused)
//!   registry                    registry   ParamsBound ───────────────► Succeeded
//! ```
//!
//! The first two states are types: [`Created`] can only be turned into
//! [`ParamsBound`], and only a [`ParamsBound`] can be launched. Declaration
//! happens inside those transitions, so the set of declared capabilities is
//! frozen before the component's thread exists.
//!
//! After launch the state is tracked in the shared [`RunnerTable`], which
//! the dispatcher watches.

mod runner;
mod table;

pub use runner::RunnerHandle;
pub use table::{RunnerStatus, RunnerTable};

use crate::config::ConfigError;
use crate::registry::CapabilityRegistry;
use coupler_component::{Component, Declarations, DeclarePhase, FailureCause, Params};
use coupler_types::ComponentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Observable lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Created,
    ParamsBound,
    Running,
    Succeeded,
    Failed,
}

impl ComponentState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::ParamsBound => "params-bound",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub component: ComponentId,
    pub state: ComponentState,
    /// Root cause, for failed components.
    pub cause: Option<FailureCause>,
    /// `true` when cached output was reused instead of running.
    pub skipped: bool,
}

impl RunResult {
    #[must_use]
    pub fn succeeded(component: ComponentId, skipped: bool) -> Self {
        Self {
            component,
            state: ComponentState::Succeeded,
            cause: None,
            skipped,
        }
    }

    #[must_use]
    pub fn failed(component: ComponentId, cause: FailureCause) -> Self {
        Self {
            component,
            state: ComponentState::Failed,
            cause: Some(cause),
            skipped: false,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == ComponentState::Succeeded
    }
}

/// A constructed component that has made its parameter-independent
/// declarations.
pub struct Created {
    id: ComponentId,
    component: Box<dyn Component>,
    registry: Arc<CapabilityRegistry>,
    declared: Vec<String>,
}

impl Created {
    /// Takes ownership of a fresh component and runs its first declaration
    /// phase.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Component`] if a declaration is rejected (for example
    /// a duplicate capability name).
    pub fn new(
        id: ComponentId,
        component: Box<dyn Component>,
        registry: Arc<CapabilityRegistry>,
    ) -> Result<Self, ConfigError> {
        let mut created = Self {
            id,
            component,
            registry,
            declared: Vec::new(),
        };
        created.declare(DeclarePhase::Construct)?;
        Ok(created)
    }

    #[must_use]
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Capabilities declared so far.
    #[must_use]
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Delivers the parameters and runs the second declaration phase.
    ///
    /// The component's own `clobber` parameter, if present, overrides the
    /// run-wide default.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Component`] if binding or declaring fails.
    pub fn bind(mut self, params: Params) -> Result<ParamsBound, ConfigError> {
        self.component
            .bind(&params)
            .map_err(|e| ConfigError::component(&self.id, e))?;
        let clobber = params
            .get_bool("clobber")
            .map_err(|e| ConfigError::component(&self.id, e))?;
        self.declare(DeclarePhase::Bound)?;
        debug!(component = %self.id, declared = ?self.declared, "Parameters bound");

        Ok(ParamsBound {
            id: self.id,
            component: self.component,
            registry: self.registry,
            declared: self.declared,
            params,
            clobber,
        })
    }

    fn declare(&mut self, phase: DeclarePhase) -> Result<(), ConfigError> {
        let mut decl = Declarations::new(&*self.registry, &self.id, &mut self.declared);
        self.component
            .declare(phase, &mut decl)
            .map_err(|e| ConfigError::component(&self.id, e))
    }
}

/// A component with bound parameters and a frozen declaration set, ready
/// to launch.
pub struct ParamsBound {
    id: ComponentId,
    component: Box<dyn Component>,
    registry: Arc<CapabilityRegistry>,
    declared: Vec<String>,
    params: Params,
    clobber: Option<bool>,
}

impl ParamsBound {
    #[must_use]
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// The frozen set of declared capabilities.
    #[must_use]
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Effective clobber policy given the run-wide default.
    #[must_use]
    pub fn clobber(&self, default: bool) -> bool {
        self.clobber.unwrap_or(default)
    }

    /// Starts the component on its own thread.
    pub fn launch(self, default_clobber: bool, table: Arc<RunnerTable>) -> RunnerHandle {
        runner::launch(self, default_clobber, table)
    }
}
