//! Store error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for store, query, and replay operations.
///
/// Every variant carries enough context for callers to branch on kind
/// without parsing message strings.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A caller-supplied event ID already exists in the log.
    ///
    /// Never retried automatically; existing data is untouched.
    #[error("duplicate event id: {event_id}")]
    DuplicateEvent {
        /// The colliding event ID.
        event_id: Uuid,
    },

    /// A range query was given `start > end`.
    #[error("invalid range: start {start} is after end {end}")]
    InvalidRange {
        /// Lower bound as supplied by the caller.
        start: DateTime<Utc>,
        /// Upper bound as supplied by the caller.
        end: DateTime<Utc>,
    },

    /// The atomic append could not commit.
    ///
    /// The partial write is rolled back, so retrying with the same
    /// `event_id` is safe.
    #[error("append failed: {reason}")]
    AppendFailed {
        /// What went wrong in the storage layer.
        reason: String,
    },

    /// A replay was cancelled cooperatively.
    ///
    /// This is a termination signal, not a failure.
    #[error("replay cancelled")]
    ReplayCancelled,

    /// A cursor token could not be decoded.
    #[error("malformed cursor token: {token}")]
    BadCursor {
        /// The token as received.
        token: String,
    },

    /// Transient storage-layer failure.
    ///
    /// Reads retry this internally with bounded backoff before
    /// surfacing; appends surface it immediately.
    #[error("storage error: {0}")]
    Storage(String),

    /// Event payload serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
