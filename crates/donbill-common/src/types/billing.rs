//! Billing service boundary types
//!
//! Requests and responses exchanged with the billing backend. Wire encoding is
//! the client implementation's concern; these are the decoded shapes.

use super::metering::MeteringReport;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Identity of the workflow execution a billing call is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveCreditsRequest {
    pub account_id: String,
    pub workflow_id: String,
    pub workflow_execution_id: String,
}

/// Conversion rate for one resource unit, as sent by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCard {
    /// Resource unit name (e.g. "compute_ms")
    pub resource_unit: String,
    /// Credits per unit, decimal string
    pub conversion_rate: String,
}

impl RateCard {
    pub fn new(resource_unit: impl Into<String>, conversion_rate: impl Into<String>) -> Self {
        Self {
            resource_unit: resource_unit.into(),
            conversion_rate: conversion_rate.into(),
        }
    }
}

/// Outcome of a credit reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveCreditsResponse {
    /// False when the account cannot fund the execution
    pub success: bool,
    /// Credits available to the execution
    pub credits: Decimal,
    /// Per-unit conversion rates
    pub rates: Vec<RateCard>,
}

/// Final receipt for a workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitWorkflowReceiptRequest {
    pub account_id: String,
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub metering: MeteringReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitWorkflowReceiptResponse {
    pub success: bool,
}
