//! Request correlation.
//!
//! Every build mints one [`CorrelationId`] and attaches it to all log lines
//! that build emits, so one request can be followed across the gateway,
//! UTXO resolution, and balancing phases.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID for one build request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The first uuid group is plenty to grep a log by.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}
