//! # DonBill Metering
//!
//! Credit accounting for workflow executions running on a Decentralized
//! Oracle Network.
//!
//! ## Flow
//!
//! ```text
//! Reports::start ─► Report::reserve ─► per capability call:
//!                                        get_max_spend_for_invocation
//!                                        deduct
//!                                        (dispatch to DON)
//!                                        settle
//!                 ─► Reports::end (send_receipt, always removed)
//! ```
//!
//! ## Components
//!
//! - [`BalanceStore`]: credit balance with per-unit conversion rates
//! - [`Report`]: per-execution reserve/deduct/settle/receipt state machine
//! - [`Reports`]: registry of in-flight reports keyed by execution id
//! - [`median_spend`]: fault-tolerant aggregation of node spend reports
//! - [`BillingClient`]: boundary to the billing backend
//!
//! The core fails open: if the billing service is unreachable, or a
//! conversion rate is unknown, spend is still tracked and reported but
//! never blocks execution.

pub mod aggregation;
pub mod balance;
pub mod billing;
pub mod metrics;
pub mod registry;
pub mod report;

pub use aggregation::{median_by_unit, median_spend, UnitMedians};
pub use balance::{BalanceMode, BalanceStore};
pub use billing::BillingClient;
pub use metrics::{FailOpenReason, MeteringMetrics, ReceiptOutcome, ReserveOutcome};
pub use registry::Reports;
pub use report::{Report, ReportState};
