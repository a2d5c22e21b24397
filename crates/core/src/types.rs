/// Jobs are identified by opaque UUIDs shared across the queue, the
/// status store, and the HTTP surface.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
