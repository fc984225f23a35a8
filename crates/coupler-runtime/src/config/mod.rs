//! Run configuration.
//!
//! # Architecture
//!
//! A run is described by one TOML file. Every top-level table is one
//! component, in file order; the table named `Global` (any case) holds
//! run-wide settings.
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌─────────────────────────────────────────┐
//! │  1. Overrides (command-line flags)      │  Per invocation
//! ├─────────────────────────────────────────┤
//! │  2. Environment Variables (COUPLER_*)   │  Runtime override
//! ├─────────────────────────────────────────┤
//! │  3. [Global] section of the run file    │  Per run
//! ├─────────────────────────────────────────┤
//! │  4. Default Values (compile-time)       │  Fallback
//! └─────────────────────────────────────────┘
//! ```
//!
//! Component parameters are flattened to strings: the core passes them to
//! the component untouched and the component interprets them through
//! [`Params`](coupler_component::Params).
//!
//! # Environment Variables
//!
//! | Variable | Global Key | Type |
//! |----------|------------|------|
//! | `COUPLER_MODE` | `mode` | `local` / `distributed` |
//! | `COUPLER_CLOBBER` | `clobber` | bool |
//! | `COUPLER_DEADLOCK_TIMEOUT_MS` | `deadlock_timeout_ms` | u64 |
//!
//! # Example Configuration
//!
//! ```toml
//! [Global]
//! mode = "distributed"
//! clobber = false
//! peers = ["10.0.0.1:7400", "10.0.0.2:7400"]
//!
//! [DummyComponent.source]
//! name = "raw"
//! output_file = "out/raw.json"
//!
//! [DummyComponent.sink]
//! name = "report"
//! capability_reqs = ["raw"]
//! rank = 1
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use coupler_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::from_path("run.toml")
//!     .with_override("clobber", "false")
//!     .load()?;
//! ```

mod error;
mod loader;
mod types;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use types::{ComponentSection, GlobalSettings, Mode, RunConfig};

/// Overrides the global `mode`.
pub const ENV_MODE: &str = "COUPLER_MODE";

/// Overrides the global `clobber` default.
pub const ENV_CLOBBER: &str = "COUPLER_CLOBBER";

/// Overrides the global `deadlock_timeout_ms`.
pub const ENV_DEADLOCK_TIMEOUT_MS: &str = "COUPLER_DEADLOCK_TIMEOUT_MS";
