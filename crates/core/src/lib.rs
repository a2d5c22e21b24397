//! Domain types for the docflow extraction pipeline.
//!
//! Holds the pieces every other crate agrees on: job/step status enums,
//! the step progress state machine, and the best-effort interpreter for
//! free-form conversion-engine output.

pub mod error;
pub mod signals;
pub mod status;
pub mod steps;
pub mod types;
