//! The Component trait.
//!
//! A component wraps one pluggable model run. The runtime drives every
//! component through the same sequence:
//!
//! 1. constructed by the factory, then [`declare`](Component::declare) with
//!    [`DeclarePhase::Construct`]
//! 2. [`bind`](Component::bind) with its parameters, then `declare` again with
//!    [`DeclarePhase::Bound`]
//! 3. [`run`](Component::run) on a dedicated thread
//!
//! Capabilities that exist regardless of configuration are usually declared
//! in the first phase; outputs switched on by parameters (an optional
//! diagnostic, a per-instance name) in the second.
//!
//! # Example
//!
//! ```
//! use coupler_component::{
//!     CapabilityContext, Component, ComponentError, Declarations, DeclarePhase, Params, Payload,
//! };
//! use serde_json::json;
//!
//! struct Doubler {
//!     diagnostics: bool,
//! }
//!
//! impl Component for Doubler {
//!     fn declare(&self, phase: DeclarePhase, decl: &mut Declarations<'_>) -> Result<(), ComponentError> {
//!         match phase {
//!             DeclarePhase::Construct => decl.declare("doubled")?,
//!             DeclarePhase::Bound if self.diagnostics => decl.declare("doubled-diag")?,
//!             DeclarePhase::Bound => {}
//!         }
//!         Ok(())
//!     }
//!
//!     fn bind(&mut self, params: &Params) -> Result<(), ComponentError> {
//!         self.diagnostics = params.get_bool("diagnostics")?.unwrap_or(false);
//!         Ok(())
//!     }
//!
//!     fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError> {
//!         let raw = ctx.acquire("raw")?;
//!         let x = raw.value().as_f64().unwrap_or_default();
//!         ctx.publish("doubled", Payload::new(json!(x * 2.0)))?;
//!         if self.diagnostics {
//!             ctx.publish("doubled-diag", Payload::new(json!({"input": x})))?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use crate::{CapabilityContext, ComponentError, Declarations, DeclarePhase, Params, Payload};
use serde_json::json;
use std::path::PathBuf;

/// Contract between the runtime and one pluggable model.
pub trait Component: Send {
    /// Declares the capabilities this component will publish.
    ///
    /// Called exactly twice: once per [`DeclarePhase`].
    fn declare(
        &self,
        phase: DeclarePhase,
        decl: &mut Declarations<'_>,
    ) -> Result<(), ComponentError>;

    /// Receives the component's parameter mapping.
    fn bind(&mut self, params: &Params) -> Result<(), ComponentError>;

    /// Performs the model run.
    ///
    /// Every declared capability should be published before returning `Ok`.
    /// Anything left unpublished is failed by the runner so consumers
    /// cannot wait forever.
    fn run(&mut self, ctx: &dyn CapabilityContext) -> Result<(), ComponentError>;

    /// Capabilities consulted when deciding whether cached output is reusable.
    fn inputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Durable outputs of a run. An empty list means the component can never
    /// skip recomputation.
    fn expected_artifacts(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Payload published for `capability` when the run is skipped.
    ///
    /// Defaults to a reference to the existing artifacts.
    fn cached_output(&self, capability: &str) -> Payload {
        let artifacts: Vec<String> = self
            .expected_artifacts()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        Payload::new(json!({
            "capability": capability,
            "artifacts": artifacts,
            "cached": true,
        }))
    }
}
