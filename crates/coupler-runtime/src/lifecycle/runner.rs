//! Component runner: one thread per component.
//!
//! A runner owns its component from launch to a terminal state and
//! reflects the outcome into the registry. Whatever happens inside the
//! component (error, panic, early return) every declared capability ends
//! up either published or failed, so no consumer waits forever.

use super::{ComponentState, ParamsBound, RunResult, RunnerTable};
use crate::registry::CapabilityRegistry;
use coupler_component::{
    CapabilityContext, CapabilityError, Component, ComponentError, FailureCause, Payload, Resolved,
};
use coupler_types::ComponentId;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to a launched runner.
pub struct RunnerHandle {
    id: ComponentId,
    thread: Result<JoinHandle<RunResult>, RunResult>,
}

impl RunnerHandle {
    #[must_use]
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Waits for the runner's terminal result.
    pub fn join(self) -> RunResult {
        match self.thread {
            Ok(handle) => handle.join().unwrap_or_else(|panic| {
                RunResult::failed(
                    self.id.clone(),
                    FailureCause::new(self.id.to_string(), panic_message(&*panic)),
                )
            }),
            Err(result) => result,
        }
    }
}

pub(super) fn launch(
    bound: ParamsBound,
    default_clobber: bool,
    table: Arc<RunnerTable>,
) -> RunnerHandle {
    let id = bound.id.clone();
    let registry = Arc::clone(&bound.registry);
    let declared = bound.declared.clone();
    table.insert(&id, ComponentState::ParamsBound);

    let runner = Runner {
        clobber: bound.clobber(default_clobber),
        ctx: RunnerContext {
            id: bound.id,
            owned: bound.declared.iter().cloned().collect(),
            registry: bound.registry,
            table: Arc::clone(&table),
        },
        declared: bound.declared,
        component: bound.component,
    };

    let spawned = std::thread::Builder::new()
        .name(format!("component-{id}"))
        .spawn(move || runner.drive());

    match spawned {
        Ok(handle) => {
            debug!(component = %id, "Runner launched");
            RunnerHandle {
                id,
                thread: Ok(handle),
            }
        }
        Err(e) => {
            error!(component = %id, error = %e, "Failed to start runner thread");
            let cause = FailureCause::new(id.to_string(), format!("failed to start thread: {e}"));
            for name in &declared {
                registry.mark_failed(name, cause.clone());
            }
            table.set_state(&id, ComponentState::Failed);
            RunnerHandle {
                thread: Err(RunResult::failed(id.clone(), cause)),
                id,
            }
        }
    }
}

struct Runner {
    component: Box<dyn Component>,
    declared: Vec<String>,
    clobber: bool,
    ctx: RunnerContext,
}

impl Runner {
    fn drive(mut self) -> RunResult {
        let id = self.ctx.id.clone();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.attempt()))
            .unwrap_or_else(|panic| Err(ComponentError::Panicked(panic_message(&*panic))));

        let result = match outcome {
            Ok(skipped) => RunResult::succeeded(id.clone(), skipped),
            Err(e) => RunResult::failed(id.clone(), e.root_cause(&id.to_string())),
        };
        self.release_unpublished(&result);
        self.ctx.table.set_state(&id, result.state);

        match &result.cause {
            None => info!(component = %id, skipped = result.skipped, "Component succeeded"),
            Some(cause) => warn!(component = %id, cause = %cause, "Component failed"),
        }
        result
    }

    /// Runs the component, or reuses its cached output. Returns whether the
    /// run was skipped.
    fn attempt(&mut self) -> Result<bool, ComponentError> {
        if !self.clobber && self.try_skip()? {
            return Ok(true);
        }

        self.ctx
            .table
            .set_state(&self.ctx.id, ComponentState::Running);
        debug!(component = %self.ctx.id, "Component running");
        self.component.run(&self.ctx)?;
        Ok(false)
    }

    /// Publishes cached output when every artifact exists and no input was
    /// computed during this run.
    fn try_skip(&self) -> Result<bool, ComponentError> {
        let id = &self.ctx.id;
        let artifacts = self.component.expected_artifacts();
        if artifacts.is_empty() {
            debug!(component = %id, "No artifacts, cannot reuse output");
            return Ok(false);
        }
        if let Some(missing) = artifacts.iter().find(|p| !p.exists()) {
            debug!(component = %id, artifact = %missing.display(), "Artifact missing, recomputing");
            return Ok(false);
        }

        for input in self.component.inputs() {
            match self.ctx.acquire_resolved(&input) {
                Ok(resolved) if resolved.fresh => {
                    info!(component = %id, input = %input, "Input recomputed this run, recomputing");
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        for name in &self.declared {
            let payload = self.component.cached_output(name);
            self.ctx.registry.publish(name, payload, false)?;
        }
        info!(component = %id, "Outputs exist and inputs unchanged, reusing cached output");
        Ok(true)
    }

    /// Fails every declared capability that was never published.
    fn release_unpublished(&self, result: &RunResult) {
        let id = &self.ctx.id;
        for name in &self.declared {
            let cause = result.cause.clone().unwrap_or_else(|| {
                FailureCause::new(id.to_string(), format!("exited without publishing '{name}'"))
            });
            if self.ctx.registry.mark_failed(name, cause) && result.is_success() {
                warn!(component = %id, capability = %name, "Component succeeded without publishing a declared capability");
            }
        }
    }
}

/// The [`CapabilityContext`] a running component sees.
struct RunnerContext {
    id: ComponentId,
    owned: HashSet<String>,
    registry: Arc<CapabilityRegistry>,
    table: Arc<RunnerTable>,
}

impl CapabilityContext for RunnerContext {
    fn component(&self) -> &ComponentId {
        &self.id
    }

    fn acquire_resolved(&self, name: &str) -> Result<Resolved, CapabilityError> {
        debug!(component = %self.id, capability = %name, "Acquiring");
        self.table.set_blocked(&self.id, Some(name));
        let resolved = self.registry.acquire_resolved(name);
        self.table.set_blocked(&self.id, None);
        resolved
    }

    fn publish(&self, name: &str, payload: Payload) -> Result<(), CapabilityError> {
        if !self.owned.contains(name) {
            return Err(CapabilityError::NotOwner {
                name: name.to_string(),
                component: self.id.to_string(),
            });
        }
        self.registry.publish(name, payload, true)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
