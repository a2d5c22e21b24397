//! Shared response envelope for introspection handlers.
//!
//! Job-facing endpoints return flat bodies shaped for their clients; the
//! operational endpoints wrap payloads in the `{ "data": ... }` envelope.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
