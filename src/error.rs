//! # Network Server Error Handling
//!
//! This module defines the `NsError` enum, which represents the error
//! kinds that can occur across the session store, MAC command engine,
//! downlink assembler, scheduler, and TX-ack reconciler.

use crate::correlation::CorrelationId;

/// Represents the different error kinds that can occur in the network
/// server core.
#[derive(Debug, thiserror::Error)]
pub enum NsError {
    /// Lookup missed both in cache and in the durable store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input violates the LoRaWAN codec or MAC command shape contract.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Counter regression, MIC failure, or disallowed MType.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Durable-store or cache round-trip failed in a way worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A unique-key constraint rejected the write; the row already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// A deadline propagated from the root request context expired.
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    /// A requested feature is unavailable on this build/deployment target.
    /// Fatal at startup; never raised at runtime on a working connection.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Invariant violation, logged with full context and surfaced.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NsError {
    /// Attaches a correlation id to the error message for log correlation.
    /// Does not change the error kind.
    pub fn with_correlation(self, id: CorrelationId) -> Self {
        let tagged = format!("{self} (correlation_id={id})");
        match self {
            NsError::NotFound(_) => NsError::NotFound(tagged),
            NsError::Malformed(_) => NsError::Malformed(tagged),
            NsError::Protocol(_) => NsError::Protocol(tagged),
            NsError::Transient(_) => NsError::Transient(tagged),
            NsError::Conflict(_) => NsError::Conflict(tagged),
            NsError::Timeout(_) => NsError::Timeout(tagged),
            NsError::Unsupported(_) => NsError::Unsupported(tagged),
            NsError::Internal(_) => NsError::Internal(tagged),
        }
    }

    /// True for error kinds that should drop the offending frame and
    /// record a counter, but never kill a session.
    pub fn is_frame_droppable(&self) -> bool {
        matches!(self, NsError::Protocol(_) | NsError::Malformed(_))
    }
}

impl From<sqlx::Error> for NsError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => NsError::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                NsError::Conflict(db_err.to_string())
            }
            other => NsError::Transient(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for NsError {
    fn from(err: redis::RedisError) -> Self {
        NsError::Transient(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for NsError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        NsError::Malformed(format!("cbor decode: {err}"))
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for NsError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        NsError::Internal(format!("cbor encode: {err}"))
    }
}
