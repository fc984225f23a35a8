//! Test doubles for component authors.
//!
//! [`MockContext`] lets a component's `run` be exercised without a registry
//! or any threads: inputs are seeded up front and never block, published
//! outputs are recorded for assertions.
//!
//! ```
//! use coupler_component::testing::MockContext;
//! use coupler_component::{CapabilityContext, Payload};
//! use coupler_types::ComponentId;
//! use serde_json::json;
//!
//! let ctx = MockContext::new(ComponentId::from_section("Sink")).owning(["summary"]);
//! ctx.provide("raw", json!([1, 2]), true);
//!
//! let raw = ctx.acquire("raw").unwrap();
//! ctx.publish("summary", Payload::new(json!(raw.value().as_array().map(Vec::len)))).unwrap();
//! assert_eq!(ctx.published_value("summary"), Some(json!(2)));
//! ```

use crate::{CapabilityContext, CapabilityError, DeclarationSink, FailureCause, Payload, Resolved};
use coupler_types::ComponentId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// In-memory [`CapabilityContext`].
pub struct MockContext {
    component: ComponentId,
    inputs: Mutex<HashMap<String, Result<Resolved, CapabilityError>>>,
    owned: HashSet<String>,
    published: Mutex<HashMap<String, Payload>>,
    acquired: Mutex<Vec<String>>,
}

impl MockContext {
    #[must_use]
    pub fn new(component: ComponentId) -> Self {
        Self {
            component,
            inputs: Mutex::new(HashMap::new()),
            owned: HashSet::new(),
            published: Mutex::new(HashMap::new()),
            acquired: Mutex::new(Vec::new()),
        }
    }

    /// Marks capabilities as owned by the component, enabling `publish`.
    #[must_use]
    pub fn owning<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owned.extend(names.into_iter().map(Into::into));
        self
    }

    /// Seeds a ready input.
    pub fn provide(&self, name: &str, value: Value, fresh: bool) {
        self.inputs.lock().insert(
            name.to_string(),
            Ok(Resolved {
                payload: Payload::new(value),
                fresh,
            }),
        );
    }

    /// Seeds a failed input.
    pub fn fail(&self, name: &str, origin: &str, message: &str) {
        self.inputs.lock().insert(
            name.to_string(),
            Err(CapabilityError::Failed {
                name: name.to_string(),
                cause: FailureCause::new(origin, message),
            }),
        );
    }

    /// Payload published under `name`, if any.
    #[must_use]
    pub fn published(&self, name: &str) -> Option<Payload> {
        self.published.lock().get(name).cloned()
    }

    /// Published document under `name`, if any.
    #[must_use]
    pub fn published_value(&self, name: &str) -> Option<Value> {
        self.published(name).map(|p| p.value().clone())
    }

    /// Names passed to `acquire*`, in call order.
    #[must_use]
    pub fn acquired(&self) -> Vec<String> {
        self.acquired.lock().clone()
    }
}

impl CapabilityContext for MockContext {
    fn component(&self) -> &ComponentId {
        &self.component
    }

    fn acquire_resolved(&self, name: &str) -> Result<Resolved, CapabilityError> {
        self.acquired.lock().push(name.to_string());
        if let Some(published) = self.published(name) {
            return Ok(Resolved {
                payload: published,
                fresh: true,
            });
        }
        self.inputs
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_else(|| {
                Err(CapabilityError::NotFound {
                    name: name.to_string(),
                })
            })
    }

    fn publish(&self, name: &str, payload: Payload) -> Result<(), CapabilityError> {
        if !self.owned.contains(name) {
            return Err(CapabilityError::NotOwner {
                name: name.to_string(),
                component: self.component.to_string(),
            });
        }
        let mut published = self.published.lock();
        if published.contains_key(name) {
            return Err(CapabilityError::AlreadyPublished {
                name: name.to_string(),
            });
        }
        published.insert(name.to_string(), payload);
        Ok(())
    }
}

/// [`DeclarationSink`] that only records owners.
#[derive(Default)]
pub struct RecordingSink {
    owners: Mutex<HashMap<String, ComponentId>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn owner_of(&self, name: &str) -> Option<ComponentId> {
        self.owners.lock().get(name).cloned()
    }
}

impl DeclarationSink for RecordingSink {
    fn register(&self, name: &str, producer: &ComponentId) -> Result<(), CapabilityError> {
        let mut owners = self.owners.lock();
        if let Some(existing) = owners.get(name) {
            return Err(CapabilityError::Duplicate {
                name: name.to_string(),
                existing: existing.to_string(),
                requested: producer.to_string(),
            });
        }
        owners.insert(name.to_string(), producer.clone());
        Ok(())
    }
}
