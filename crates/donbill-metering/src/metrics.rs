//! Prometheus metrics for the metering core

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Why a balance store stopped enforcing its balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOpenReason {
    /// Billing service unreachable during reservation
    BillingUnavailable,
    /// No billing client configured
    Unconfigured,
    /// Conversion requested for a unit with no rate
    UnknownUnit,
    /// Billing service sent an unparseable rate
    BadRate,
    /// Caller forced metering mode
    Forced,
}

impl FailOpenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailOpenReason::BillingUnavailable => "billing_unavailable",
            FailOpenReason::Unconfigured => "unconfigured",
            FailOpenReason::UnknownUnit => "unknown_unit",
            FailOpenReason::BadRate => "bad_rate",
            FailOpenReason::Forced => "forced",
        }
    }
}

/// Result of a reservation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    Funded,
    Metered,
    Declined,
    Unconfigured,
}

impl ReserveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReserveOutcome::Funded => "funded",
            ReserveOutcome::Metered => "metered",
            ReserveOutcome::Declined => "declined",
            ReserveOutcome::Unconfigured => "unconfigured",
        }
    }
}

/// Result of a receipt submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Sent,
    Failed,
    Error,
}

impl ReceiptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptOutcome::Sent => "sent",
            ReceiptOutcome::Failed => "failed",
            ReceiptOutcome::Error => "error",
        }
    }
}

/// Metering counters and gauges
#[derive(Clone)]
pub struct MeteringMetrics {
    pub reserve_total: IntCounterVec,
    pub fail_open_total: IntCounterVec,
    pub dropped_spend_values_total: IntCounter,
    pub overspend_total: IntCounter,
    pub receipt_total: IntCounterVec,
    pub active_reports: IntGauge,
}

impl MeteringMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            reserve_total: IntCounterVec::new(
                Opts::new("donbill_reserve_total", "Credit reservations by outcome"),
                &["outcome"],
            )?,
            fail_open_total: IntCounterVec::new(
                Opts::new(
                    "donbill_fail_open_total",
                    "Transitions into metering mode by reason",
                ),
                &["reason"],
            )?,
            dropped_spend_values_total: IntCounter::new(
                "donbill_dropped_spend_values_total",
                "Malformed node spend values dropped during settlement",
            )?,
            overspend_total: IntCounter::new(
                "donbill_overspend_total",
                "Settlements whose actual spend exceeded the deduction",
            )?,
            receipt_total: IntCounterVec::new(
                Opts::new("donbill_receipt_total", "Workflow receipt submissions by outcome"),
                &["outcome"],
            )?,
            active_reports: IntGauge::new(
                "donbill_active_reports",
                "Workflow executions with an open metering report",
            )?,
        })
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.reserve_total.clone()))?;
        registry.register(Box::new(self.fail_open_total.clone()))?;
        registry.register(Box::new(self.dropped_spend_values_total.clone()))?;
        registry.register(Box::new(self.overspend_total.clone()))?;
        registry.register(Box::new(self.receipt_total.clone()))?;
        registry.register(Box::new(self.active_reports.clone()))?;
        Ok(())
    }

    pub fn record_reserve(&self, outcome: ReserveOutcome) {
        self.reserve_total.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_fail_open(&self, reason: FailOpenReason) {
        self.fail_open_total.with_label_values(&[reason.as_str()]).inc();
    }

    pub fn record_receipt(&self, outcome: ReceiptOutcome) {
        self.receipt_total.with_label_values(&[outcome.as_str()]).inc();
    }
}

impl std::fmt::Debug for MeteringMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteringMetrics")
            .field("active_reports", &self.active_reports.get())
            .finish_non_exhaustive()
    }
}
