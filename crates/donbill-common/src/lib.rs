//! # DonBill Common
//!
//! Shared types, errors, and configuration for DonBill, the credit accounting
//! core of a DON workflow runtime.
//!
//! ## Core Types
//!
//! - [`MeteringReport`]: per-execution spend report, one entry per settled step
//! - [`MeteringNodeDetail`]: spend claimed by a single DON node
//! - [`SpendDecimal`]: decimal tagged with its publishing precision
//! - [`CapabilityInfo`]/[`SpendLimit`]: capability cost model and limits
//! - Billing boundary requests and responses under [`types::billing`]
//!
//! ## Errors
//!
//! [`DonBillError`] folds the per-component kinds ([`BalanceError`],
//! [`ReportError`], [`RegistryError`], [`BillingError`]).

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use config::MeteringConfig;
pub use error::{BalanceError, BillingError, DonBillError, RegistryError, ReportError, Result};
pub use types::{
    billing::{
        RateCard, ReserveCreditsRequest, ReserveCreditsResponse, SubmitWorkflowReceiptRequest,
        SubmitWorkflowReceiptResponse,
    },
    capability::{CapabilityInfo, SpendLimit, SpendType},
    decimal::{parse_decimal, SpendDecimal, SPEND_LIMIT_PRECISION, SPEND_VALUE_PRECISION},
    metering::{MeteringNodeDetail, MeteringReport, MeteringReportStep},
};

/// DonBill version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
