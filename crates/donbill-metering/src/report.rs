//! Per-execution metering report
//!
//! A `Report` follows one workflow execution from credit reservation to the
//! final receipt:
//!
//! ```text
//! reserve ──► (max spend ► deduct ► dispatch ► settle)* ──► send_receipt
//! ```
//!
//! Deductions are optimistic: a capability call withholds credits before it
//! runs, and settlement trues the balance up against the median of what the
//! DON nodes report it actually cost.

use crate::aggregation::median_by_unit;
use crate::balance::BalanceStore;
use crate::billing::{with_deadline, BillingClient};
use crate::metrics::{FailOpenReason, MeteringMetrics, ReceiptOutcome, ReserveOutcome};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use donbill_common::{
    parse_decimal, CapabilityInfo, MeteringConfig, MeteringNodeDetail, MeteringReport,
    MeteringReportStep, ReportError, ReserveCreditsRequest, Result, SpendDecimal, SpendLimit,
    SubmitWorkflowReceiptRequest,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, instrument, warn};

/// Reservation state of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportState {
    /// `reserve` has not completed
    Unreserved,
    /// Reserved, spend is tracked but never blocked
    Metered,
    /// Reserved against a known credit balance
    Funded,
}

impl ReportState {
    pub fn is_reserved(&self) -> bool {
        !matches!(self, ReportState::Unreserved)
    }
}

/// Credits withheld for one step
#[derive(Debug, Clone, Copy, PartialEq)]
struct Deduction {
    requested: Option<Decimal>,
    withheld: Decimal,
}

/// Metering report for a single workflow execution
pub struct Report {
    account_id: String,
    workflow_id: String,
    workflow_execution_id: String,
    client: Option<Arc<dyn BillingClient>>,
    config: MeteringConfig,
    metrics: Option<Arc<MeteringMetrics>>,
    /// Set exactly once, by `reserve`
    balance: OnceLock<BalanceStore>,
    deducted: DashMap<String, Deduction>,
    settled: DashMap<String, Vec<MeteringNodeDetail>>,
}

impl Report {
    pub fn new(
        account_id: impl Into<String>,
        workflow_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
        client: Option<Arc<dyn BillingClient>>,
        config: MeteringConfig,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            workflow_id: workflow_id.into(),
            workflow_execution_id: workflow_execution_id.into(),
            client,
            config,
            metrics: None,
            balance: OnceLock::new(),
            deducted: DashMap::new(),
            settled: DashMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MeteringMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn workflow_execution_id(&self) -> &str {
        &self.workflow_execution_id
    }

    pub fn state(&self) -> ReportState {
        match self.balance.get() {
            None => ReportState::Unreserved,
            Some(store) if store.is_metering_mode() => ReportState::Metered,
            Some(_) => ReportState::Funded,
        }
    }

    /// Local credit balance, once reserved
    pub fn balance(&self) -> Option<Decimal> {
        self.balance.get().map(BalanceStore::get)
    }

    pub fn is_deducted(&self, step_ref: &str) -> bool {
        self.deducted.contains_key(step_ref)
    }

    pub fn is_settled(&self, step_ref: &str) -> bool {
        self.settled.contains_key(step_ref)
    }

    /// Reserve credits for this execution.
    ///
    /// A missing or unreachable billing service puts the report in metering
    /// mode instead of failing. Only an explicit decline is an error.
    #[instrument(skip(self), fields(workflow_execution_id = %self.workflow_execution_id))]
    pub async fn reserve(&self) -> Result<()> {
        if self.balance.get().is_some() {
            debug!("Report already reserved");
            return Ok(());
        }

        let Some(client) = &self.client else {
            debug!("No billing client configured, metering only");
            self.install(self.metered_store(FailOpenReason::Unconfigured));
            self.record_reserve(ReserveOutcome::Unconfigured);
            return Ok(());
        };

        let request = ReserveCreditsRequest {
            account_id: self.account_id.clone(),
            workflow_id: self.workflow_id.clone(),
            workflow_execution_id: self.workflow_execution_id.clone(),
        };

        let response = match with_deadline(
            self.config.billing_timeout(),
            client.reserve_credits(request),
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Billing service unavailable, continuing in metering mode");
                self.install(self.metered_store(FailOpenReason::BillingUnavailable));
                self.record_reserve(ReserveOutcome::Metered);
                return Ok(());
            }
        };

        if !response.success {
            info!(account_id = %self.account_id, "Billing service declined credit reservation");
            self.record_reserve(ReserveOutcome::Declined);
            return Err(ReportError::InsufficientFunding.into());
        }

        let mut bad_rate = false;
        let rates: Vec<(String, Decimal)> = response
            .rates
            .iter()
            .filter_map(|card| match parse_decimal(&card.conversion_rate) {
                Some(rate) => Some((card.resource_unit.clone(), rate)),
                None => {
                    warn!(
                        unit = %card.resource_unit,
                        rate = %card.conversion_rate,
                        "Dropping unparseable conversion rate"
                    );
                    bad_rate = true;
                    None
                }
            })
            .collect();

        let store = self.attach_metrics(BalanceStore::new(response.credits, rates));
        if bad_rate {
            store.enter_metering_mode(FailOpenReason::BadRate);
        }
        self.install(store);

        let outcome = match self.state() {
            ReportState::Metered => ReserveOutcome::Metered,
            _ => ReserveOutcome::Funded,
        };
        self.record_reserve(outcome);
        info!(credits = %response.credits, outcome = outcome.as_str(), "Credits reserved");
        Ok(())
    }

    /// Convert an amount of `unit` into credits
    pub fn convert_to_balance(&self, unit: &str, amount: Decimal) -> Result<Decimal> {
        Ok(self.reserved()?.convert_to_balance(unit, amount))
    }

    /// Most a single capability invocation may spend.
    ///
    /// The balance is split evenly over `open_slots` pending calls and capped
    /// by the user's limit. `None` means unbounded (metering mode).
    pub fn get_max_spend_for_invocation(
        &self,
        step_ref: &str,
        user_spend_limit: Option<Decimal>,
        open_slots: usize,
    ) -> Result<Option<Decimal>> {
        if open_slots == 0 {
            return Err(ReportError::NoOpenCalls.into());
        }

        let store = self.reserved()?;
        if store.is_metering_mode() {
            return Ok(None);
        }

        let mut per_slot = store.get() / Decimal::from(open_slots);
        if let Some(limit) = user_spend_limit {
            per_slot = per_slot.min(limit);
        }

        debug!(step_ref = %step_ref, open_slots, max_spend = %per_slot, "Computed invocation spend cap");
        Ok(Some(per_slot))
    }

    /// Withhold credits for a step before it is dispatched.
    ///
    /// The step is recorded even if the balance cannot cover it, so a second
    /// deduction for the same step always fails.
    pub fn deduct(&self, step_ref: &str, amount: Option<Decimal>) -> Result<()> {
        let store = self.reserved()?;

        let entry = match self.deducted.entry(step_ref.to_string()) {
            Entry::Occupied(_) => {
                return Err(ReportError::StepDeductExists(step_ref.to_string()).into());
            }
            Entry::Vacant(entry) => entry,
        };

        let mut deduction = Deduction {
            requested: amount,
            withheld: Decimal::ZERO,
        };

        let outcome = match amount {
            Some(value) if !store.is_metering_mode() && !value.is_zero() => {
                let result = store.minus(value);
                if result.is_ok() {
                    deduction.withheld = value;
                }
                result
            }
            _ => Ok(()),
        };
        entry.insert(deduction);

        match outcome {
            Ok(()) => {
                debug!(
                    step_ref = %step_ref,
                    requested = ?deduction.requested,
                    withheld = %deduction.withheld,
                    "Step deducted"
                );
                Ok(())
            }
            Err(e) => {
                warn!(step_ref = %step_ref, error = %e, "Step deduction rejected");
                Err(e.into())
            }
        }
    }

    /// Reconcile a step against the spend its nodes reported.
    ///
    /// The per-unit median of node reports is converted into credits and the
    /// withheld amount is trued up against it. Overspend is logged, never
    /// rejected: the capability already ran.
    pub fn settle(&self, step_ref: &str, nodes: Vec<MeteringNodeDetail>) -> Result<()> {
        let store = self.reserved()?;

        let withheld = self
            .deducted
            .get(step_ref)
            .map(|d| d.withheld)
            .ok_or_else(|| ReportError::NoDeduct(step_ref.to_string()))?;

        let entry = match self.settled.entry(step_ref.to_string()) {
            Entry::Occupied(_) => {
                return Err(ReportError::StepSpendExists(step_ref.to_string()).into());
            }
            Entry::Vacant(entry) => entry,
        };

        let aggregated = median_by_unit(&nodes);
        if let Some(metrics) = &self.metrics {
            metrics
                .dropped_spend_values_total
                .inc_by(aggregated.dropped.len() as u64);
        }

        let spent: Decimal = aggregated
            .medians
            .iter()
            .map(|(unit, median)| store.convert_to_balance(unit, *median))
            .fold(Decimal::ZERO, |acc, credits| acc.saturating_add(credits));

        if store.is_metering_mode() {
            debug!(step_ref = %step_ref, spent = %spent, "Step settled in metering mode");
        } else {
            self.true_up(store, step_ref, withheld, spent);
        }

        entry.insert(nodes);
        Ok(())
    }

    fn true_up(&self, store: &BalanceStore, step_ref: &str, withheld: Decimal, spent: Decimal) {
        let delta = spent - withheld;

        if delta < Decimal::ZERO {
            let refund = -delta;
            match store.add(refund) {
                Ok(()) => debug!(step_ref = %step_ref, refund = %refund, "Refunded unspent credits"),
                Err(e) => warn!(step_ref = %step_ref, error = %e, "Failed to refund unspent credits"),
            }
        } else if delta > Decimal::ZERO {
            if let Some(metrics) = &self.metrics {
                metrics.overspend_total.inc();
            }
            let shortfall = store.minus_saturating(delta);
            if shortfall.is_zero() {
                warn!(step_ref = %step_ref, withheld = %withheld, spent = %spent, "Step spent more than deducted");
            } else {
                warn!(
                    step_ref = %step_ref,
                    withheld = %withheld,
                    spent = %spent,
                    shortfall = %shortfall,
                    "Step overspend exceeds remaining balance"
                );
            }
        }
    }

    /// Spend limit for a capability, in the first of its spend types with a
    /// known rate.
    ///
    /// Spend types without a rate push the report into metering mode. Returns
    /// an empty list if no type has a rate.
    pub fn credit_to_spending_limits(
        &self,
        info: &CapabilityInfo,
        total_credits: Decimal,
    ) -> Vec<SpendLimit> {
        let Some(store) = self.balance.get() else {
            debug!(capability = %info.id, "Spend limits requested before reservation");
            return Vec::new();
        };

        for spend_type in &info.spend_types {
            let Some(rate) = store.lookup_rate(spend_type) else {
                continue;
            };

            let limit = total_credits.checked_div(rate).unwrap_or(Decimal::MAX);
            return vec![SpendLimit {
                spend_type: spend_type.clone(),
                limit: SpendDecimal::new(limit, self.config.spend_limit_precision).to_fixed(),
            }];
        }

        Vec::new()
    }

    /// Render the settled steps for the billing service
    pub fn format_report(&self) -> MeteringReport {
        let precision = self.config.spend_value_precision;

        let steps: BTreeMap<String, MeteringReportStep> = self
            .settled
            .iter()
            .map(|entry| {
                let nodes = entry
                    .value()
                    .iter()
                    .map(|node| MeteringNodeDetail {
                        peer_2_peer_id: node.peer_2_peer_id.clone(),
                        spend_unit: node.spend_unit.clone(),
                        spend_value: match parse_decimal(&node.spend_value) {
                            Some(value) => SpendDecimal::new(value, precision).to_fixed(),
                            None => node.spend_value.clone(),
                        },
                    })
                    .collect();
                (entry.key().clone(), MeteringReportStep { nodes })
            })
            .collect();

        MeteringReport {
            metadata: BTreeMap::new(),
            steps,
        }
    }

    /// Submit the final metering report to the billing service
    #[instrument(skip(self), fields(workflow_execution_id = %self.workflow_execution_id))]
    pub async fn send_receipt(&self) -> Result<()> {
        self.reserved()?;

        let Some(client) = &self.client else {
            return Err(ReportError::NoBillingClient.into());
        };

        let request = SubmitWorkflowReceiptRequest {
            account_id: self.account_id.clone(),
            workflow_id: self.workflow_id.clone(),
            workflow_execution_id: self.workflow_execution_id.clone(),
            metering: self.format_report(),
        };
        let steps = request.metering.len();

        let result = with_deadline(
            self.config.billing_timeout(),
            client.submit_workflow_receipt(request),
        )
        .await;

        match result {
            Ok(Some(response)) if response.success => {
                self.record_receipt(ReceiptOutcome::Sent);
                info!(steps, "Workflow receipt submitted");
                Ok(())
            }
            Ok(_) => {
                self.record_receipt(ReceiptOutcome::Failed);
                error!(steps, "Billing service rejected workflow receipt");
                Err(ReportError::ReceiptFailed.into())
            }
            Err(e) => {
                self.record_receipt(ReceiptOutcome::Error);
                error!(error = %e, "Failed to submit workflow receipt");
                Err(e.into())
            }
        }
    }

    fn reserved(&self) -> Result<&BalanceStore> {
        self.balance
            .get()
            .ok_or_else(|| ReportError::NoReserve.into())
    }

    fn metered_store(&self, reason: FailOpenReason) -> BalanceStore {
        let store = self.attach_metrics(BalanceStore::empty());
        store.enter_metering_mode(reason);
        store
    }

    fn attach_metrics(&self, store: BalanceStore) -> BalanceStore {
        match &self.metrics {
            Some(metrics) => store.with_metrics(metrics.clone()),
            None => store,
        }
    }

    fn install(&self, store: BalanceStore) {
        if self.balance.set(store).is_err() {
            debug!("Concurrent reservation already installed a balance");
        }
    }

    fn record_reserve(&self, outcome: ReserveOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_reserve(outcome);
        }
    }

    fn record_receipt(&self, outcome: ReceiptOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_receipt(outcome);
        }
    }
}

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Report")
            .field("account_id", &self.account_id)
            .field("workflow_id", &self.workflow_id)
            .field("workflow_execution_id", &self.workflow_execution_id)
            .field("state", &self.state())
            .field("deducted", &self.deducted.len())
            .field("settled", &self.settled.len())
            .finish()
    }
}
