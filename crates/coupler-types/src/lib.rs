//! Core types for coupler.
//!
//! coupler runs interdependent simulation components whose execution order
//! is discovered at run time, from the named data ("capabilities") they
//! request from one another.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Component Contract Layer                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  coupler-types     : ComponentId, Rank, ErrorCode  ◄── HERE │
//! │  coupler-component : Component trait, Payload, Params       │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Runtime Layer                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  coupler-runtime   : registry, runner, dispatcher, transport │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Frontend Layer                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  coupler-cli       : `coupler` binary                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod error;
mod id;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{ComponentId, Rank, GLOBAL_SECTION};
