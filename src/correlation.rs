//! # Correlation identifiers
//!
//! Every inbound operation (uplink handling, a scheduler tick, TX-ack
//! reconciliation) is assigned a `CorrelationId`, threaded through to the
//! session store and attached to the `tracing::Span` for that operation so
//! log lines from unrelated concurrent operations can be told apart.

use std::fmt;

/// Opaque identifier threaded through one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    /// Generates a fresh, random correlation id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
