//! Component constructors by kind.
//!
//! A configuration section `Kind.instance` is built by the constructor
//! registered for `Kind`. Several instances of one kind can coexist as long
//! as their declared capabilities differ.

use crate::components::DummyComponent;
use crate::config::ConfigError;
use coupler_component::Component;
use coupler_types::ComponentId;
use std::collections::HashMap;

/// Builds a fresh component for a section.
pub type Constructor = Box<dyn Fn(&ComponentId) -> Box<dyn Component> + Send + Sync>;

/// Registry of component kinds.
///
/// # Example
///
/// ```
/// use coupler_runtime::ComponentFactory;
/// use coupler_types::ComponentId;
///
/// let factory = ComponentFactory::with_builtins();
/// assert!(factory.create(&ComponentId::from_section("DummyComponent.a")).is_ok());
/// assert!(factory.create(&ComponentId::from_section("Unknown")).is_err());
/// ```
#[derive(Default)]
pub struct ComponentFactory {
    constructors: HashMap<String, Constructor>,
}

impl ComponentFactory {
    /// An empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with the components shipped in this crate.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register(DummyComponent::KIND, |_| Box::new(DummyComponent::new()));
        factory
    }

    /// Registers (or replaces) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&ComponentId) -> Box<dyn Component> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
    }

    /// Builds the component for `id`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownKind`] if no constructor matches `id.kind()`.
    pub fn create(&self, id: &ComponentId) -> Result<Box<dyn Component>, ConfigError> {
        let constructor =
            self.constructors
                .get(id.kind())
                .ok_or_else(|| ConfigError::UnknownKind {
                    section: id.to_string(),
                    kind: id.kind().to_string(),
                })?;
        Ok(constructor(id))
    }

    /// Registered kinds, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
