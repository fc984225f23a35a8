//! Coupler runtime.
//!
//! Executes a set of pluggable model components that exchange named data
//! products ("capabilities"). Every component runs on its own thread and
//! blocks only when it needs data that is not ready yet, so the execution
//! order follows from the data dependencies alone.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  config/      : TOML sections, global settings, env vars │
//! │  factory      : kind name → component constructor        │
//! ├──────────────────────────────────────────────────────────┤
//! │  dispatcher/  : instantiate, launch, watch, report       │
//! │  lifecycle/   : Created → ParamsBound → runner thread    │
//! │  registry     : capability table, blocking acquire       │
//! ├──────────────────────────────────────────────────────────┤
//! │  transport/   : multi-process directory and requests     │
//! │  components/  : builtin components                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! ## [`config`] - Configuration
//!
//! - [`ConfigLoader`](config::ConfigLoader): file or inline TOML, env overrides
//! - [`RunConfig`](config::RunConfig): global settings plus component sections
//!
//! ## [`registry`] - Capability Registry
//!
//! - [`CapabilityRegistry`]: declare, publish, fail, blocking acquire
//!
//! ## [`lifecycle`] - Component Lifecycle
//!
//! - [`Created`](lifecycle::Created) and [`ParamsBound`](lifecycle::ParamsBound)
//!   make the construction order a type-level property
//! - [`RunnerTable`](lifecycle::RunnerTable): per-runner state and wait edge
//!
//! ## [`dispatcher`] - Run Control
//!
//! - [`Dispatcher`]: runs a configuration locally or as one rank of a
//!   distributed run
//! - [`Watchdog`](dispatcher::Watchdog): declares a deadlock when every live
//!   runner waits and nothing is published
//!
//! ## [`transport`] - Distributed Mode
//!
//! - [`Transport`]: TCP endpoint of one process
//!
//! # Example
//!
//! ```
//! use coupler_runtime::config::ConfigLoader;
//! use coupler_runtime::Dispatcher;
//!
//! let config = ConfigLoader::from_toml(
//!     r#"
//! [DummyComponent.a]
//! name = "a"
//!
//! [DummyComponent.b]
//! name = "b"
//! capability_reqs = ["a"]
//! "#,
//! )
//! .skip_env_vars()
//! .load()?;
//!
//! let report = Dispatcher::new(config).run()?;
//! assert!(report.is_success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod components;
pub mod config;
pub mod dispatcher;
mod error;
pub mod factory;
pub mod lifecycle;
pub mod registry;
pub mod transport;

pub use dispatcher::{Dispatcher, RunReport};
pub use error::DispatchError;
pub use factory::ComponentFactory;
pub use registry::CapabilityRegistry;
pub use transport::{Transport, TransportError};
