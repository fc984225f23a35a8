//! Component contract for the coupler runtime.
//!
//! This crate is everything a model author needs to plug a simulation into
//! the coupler: the [`Component`] trait, the capability access it runs
//! against, parameters, payloads and the error types that cross the
//! boundary.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                     coupler-runtime                    │
//! │  registry · runners · dispatcher · transport · config  │
//! └───────────────┬───────────────────────────▲────────────┘
//!                 │ Declarations / Params     │ CapabilityContext
//!                 ▼                           │
//! ┌────────────────────────────────────────────────────────┐
//! │                  dyn Component (this crate)            │
//! │   declare(phase) → bind(params) → declare → run(ctx)   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Components communicate only through named capabilities. A producer
//! declares a name before anything runs, then publishes a [`Payload`] under
//! it exactly once; consumers block in [`CapabilityContext::acquire`] until
//! the payload is ready or the producer has failed.
//!
//! # Testing
//!
//! The [`testing`] module provides [`testing::MockContext`] so a component
//! can be unit tested without starting a runtime.

mod component;
mod context;
mod error;
mod params;
mod payload;
pub mod testing;

pub use component::Component;
pub use context::{
    CapabilityContext, DeclarationSink, Declarations, DeclarePhase, GENERAL_CAPABILITY,
};
pub use error::{CapabilityError, ComponentError, FailureCause};
pub use params::Params;
pub use payload::{Payload, Resolved};
