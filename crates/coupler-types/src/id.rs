//! Identifier types.
//!
//! Components are identified by the name of their configuration section.
//! The section name also selects the component kind: everything before the
//! first `.` is the kind, so several instances of one kind can coexist
//! (`DummyComponent.alice`, `DummyComponent.bob`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the distinguished global section and of its pseudo-component.
pub const GLOBAL_SECTION: &str = "Global";

/// Identifier for a configured component.
///
/// Equality and hashing use both fields; in practice the name alone is
/// unique because configuration sections are unique.
///
/// # Example
///
/// ```
/// use coupler_types::ComponentId;
///
/// let id = ComponentId::from_section("DummyComponent.alice");
/// assert_eq!(id.kind(), "DummyComponent");
/// assert_eq!(id.name(), "DummyComponent.alice");
///
/// let plain = ComponentId::from_section("HydrologyModel");
/// assert_eq!(plain.kind(), "HydrologyModel");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    kind: String,
    name: String,
}

impl ComponentId {
    /// Creates an identifier with an explicit kind and instance name.
    #[must_use]
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Derives the identifier from a configuration section name.
    ///
    /// Surrounding whitespace of the kind part is ignored.
    #[must_use]
    pub fn from_section(section: &str) -> Self {
        let kind = section
            .split_once('.')
            .map_or(section, |(kind, _)| kind)
            .trim();
        Self::new(kind, section.trim())
    }

    /// The pseudo-component that owns the `general` capability.
    #[must_use]
    pub fn global() -> Self {
        Self::new(GLOBAL_SECTION, GLOBAL_SECTION)
    }

    /// Component kind (constructor key in the factory).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Instance name (the full section name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Index of a cooperating process in a distributed run.
///
/// Rank 0 doubles as the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rank(pub usize);

impl Rank {
    /// The coordinating process.
    pub const COORDINATOR: Rank = Rank(0);

    /// Returns `true` for the coordinating process.
    #[must_use]
    pub fn is_coordinator(self) -> bool {
        self == Self::COORDINATOR
    }

    /// Numeric index, usable for indexing the peer list.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {}", self.0)
    }
}
