//! Components shipped with the runtime.

mod dummy;

pub use dummy::DummyComponent;
