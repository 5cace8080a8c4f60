//! Capability spend declarations and limits

use serde::{Deserialize, Serialize};

/// Resource unit a capability may spend in
pub type SpendType = String;

/// What the dispatch layer knows about a capability's cost model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    /// Capability id (e.g. "write_chain@1.0.0")
    pub id: String,
    /// Declared spend types, in order of preference
    pub spend_types: Vec<SpendType>,
}

impl CapabilityInfo {
    pub fn new(id: impl Into<String>, spend_types: Vec<SpendType>) -> Self {
        Self {
            id: id.into(),
            spend_types,
        }
    }
}

/// Upper bound on what a capability may spend, in one resource unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendLimit {
    pub spend_type: SpendType,
    /// Fixed-point limit, 3 decimal places
    pub limit: String,
}
