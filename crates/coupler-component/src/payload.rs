//! Capability payloads.
//!
//! The runtime never interprets a payload. It is a JSON document behind an
//! [`Arc`], so handing the same payload to many waiters is a reference-count
//! bump and every waiter observes the identical value. JSON is also what the
//! distributed transport ships between processes, so a payload published on
//! one rank arrives unmodified on another.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

/// Opaque, cheaply cloneable capability data.
///
/// # Example
///
/// ```
/// use coupler_component::Payload;
/// use serde_json::json;
///
/// let p = Payload::new(json!({"runoff": [1.5, 2.0]}));
/// let q = p.clone();
/// assert!(p.ptr_eq(&q));
/// assert_eq!(q.value()["runoff"][1], 2.0);
/// ```
#[derive(Debug, Clone)]
pub struct Payload(Arc<Value>);

impl Payload {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the underlying document.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Returns `true` when both handles share one allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Extract the document, cloning only if other handles are alive.
    #[must_use]
    pub fn into_value(self) -> Value {
        Arc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0 == other.0
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::new)
    }
}

/// A ready capability as handed out by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub payload: Payload,
    /// `true` when the producer actually computed the data during this run,
    /// `false` when it replayed cached output.
    pub fresh: bool,
}
