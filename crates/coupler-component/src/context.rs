//! Runtime services visible to a component.
//!
//! A component never sees the registry directly. During construction and
//! parameter binding it gets a [`Declarations`] handle to announce what it
//! will produce; while running it gets a [`CapabilityContext`] to read other
//! components' data and publish its own.
//!
//! ```text
//!  Created ──declare(Construct)──► bind(params) ──declare(Bound)──► run(ctx)
//!     │                                                               │
//!     └────────────── Declarations (frozen after Bound) ──────────────┘
//!                                                  CapabilityContext ─┘
//! ```

use crate::{CapabilityError, Payload, Resolved};
use coupler_types::ComponentId;

/// Reserved capability carrying the global configuration section.
pub const GENERAL_CAPABILITY: &str = "general";

/// When a declaration hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarePhase {
    /// Right after construction, before parameters are known.
    Construct,
    /// Right after parameters were bound; last chance to declare.
    Bound,
}

/// Destination of capability declarations (implemented by the registry).
pub trait DeclarationSink {
    /// Records `producer` as the sole owner of `name`.
    ///
    /// # Errors
    ///
    /// [`CapabilityError::Duplicate`] if the name is already declared.
    fn register(&self, name: &str, producer: &ComponentId) -> Result<(), CapabilityError>;
}

/// Declaration handle passed to [`Component::declare`](crate::Component::declare).
///
/// Records every accepted name so the runner knows which capabilities the
/// component owns when it terminates.
pub struct Declarations<'a> {
    sink: &'a dyn DeclarationSink,
    owner: &'a ComponentId,
    declared: &'a mut Vec<String>,
}

impl<'a> Declarations<'a> {
    pub fn new(
        sink: &'a dyn DeclarationSink,
        owner: &'a ComponentId,
        declared: &'a mut Vec<String>,
    ) -> Self {
        Self {
            sink,
            owner,
            declared,
        }
    }

    /// Declares a capability owned by this component.
    ///
    /// # Errors
    ///
    /// [`CapabilityError::Duplicate`] when another component (or this one,
    /// earlier) already declared `name`.
    pub fn declare(&mut self, name: impl AsRef<str>) -> Result<(), CapabilityError> {
        let name = name.as_ref();
        self.sink.register(name, self.owner)?;
        self.declared.push(name.to_string());
        Ok(())
    }

    /// The component being declared for.
    #[must_use]
    pub fn owner(&self) -> &ComponentId {
        self.owner
    }
}

/// Capability access while a component runs.
///
/// `acquire*` calls block until the capability is ready or failed; they are
/// the only blocking operations available to a component.
pub trait CapabilityContext: Send + Sync {
    /// The running component.
    fn component(&self) -> &ComponentId;

    /// Waits for `name` and returns its payload together with its freshness.
    ///
    /// # Errors
    ///
    /// - [`CapabilityError::NotFound`] immediately if nobody declares `name`
    /// - [`CapabilityError::Failed`] if the producer terminated abnormally
    fn acquire_resolved(&self, name: &str) -> Result<Resolved, CapabilityError>;

    /// Publishes an owned capability, computed during this run.
    ///
    /// # Errors
    ///
    /// [`CapabilityError::NotOwner`] or [`CapabilityError::AlreadyPublished`].
    fn publish(&self, name: &str, payload: Payload) -> Result<(), CapabilityError>;

    /// Waits for `name` and returns its payload.
    fn acquire(&self, name: &str) -> Result<Payload, CapabilityError> {
        self.acquire_resolved(name).map(|r| r.payload)
    }

    /// Like [`acquire`](Self::acquire), but an undeclared capability is `None`.
    fn acquire_optional(&self, name: &str) -> Result<Option<Payload>, CapabilityError> {
        match self.acquire(name) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The global configuration section (the `general` capability).
    fn global(&self) -> Result<Payload, CapabilityError> {
        self.acquire(GENERAL_CAPABILITY)
    }
}
