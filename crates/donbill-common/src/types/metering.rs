//! Metering report types
//!
//! A `MeteringReport` is the artifact handed to the billing backend at the end
//! of a workflow execution. It keeps every node's raw spend claim per step so
//! the backend can audit which peer reported what.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Spend reported by one DON node for one capability step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteringNodeDetail {
    /// Peer-to-peer id of the reporting node
    #[serde(rename = "peer2peerId")]
    pub peer_2_peer_id: String,
    /// Resource unit the spend is expressed in
    pub spend_unit: String,
    /// Decimal spend value, as reported
    pub spend_value: String,
}

impl MeteringNodeDetail {
    pub fn new(
        peer_2_peer_id: impl Into<String>,
        spend_unit: impl Into<String>,
        spend_value: impl Into<String>,
    ) -> Self {
        Self {
            peer_2_peer_id: peer_2_peer_id.into(),
            spend_unit: spend_unit.into(),
            spend_value: spend_value.into(),
        }
    }
}

/// All node reports for a single step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringReportStep {
    pub nodes: Vec<MeteringNodeDetail>,
}

/// Final per-execution report submitted with the workflow receipt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringReport {
    /// Always empty at this layer
    pub metadata: BTreeMap<String, String>,
    /// Step reference -> node reports
    pub steps: BTreeMap<String, MeteringReportStep>,
}

impl MeteringReport {
    /// Number of settled steps in the report
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Serialize for telemetry emission
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
