//! HTTP surface for the docflow pipeline: job submission, status
//! polling, SSE streaming, and queue introspection.

pub mod config;
pub mod error;
pub mod response;
pub mod routes;
pub mod state;
