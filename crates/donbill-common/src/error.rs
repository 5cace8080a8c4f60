//! Error types for DonBill
//!
//! Provides a unified error type and the kind enums each component raises.
//! Callers match on variants, never on rendered messages.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias using DonBillError
pub type Result<T> = std::result::Result<T, DonBillError>;

/// Unified error type for DonBill operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DonBillError {
    // Balance store errors
    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),

    // Report state machine errors
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    // Report registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    // Billing backend errors
    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Balance store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BalanceError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },
}

/// Per-execution report errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReportError {
    #[error("Insufficient funding: billing service declined the reservation")]
    InsufficientFunding,

    #[error("Report has not been reserved")]
    NoReserve,

    #[error("No open calls: at least one invocation slot is required")]
    NoOpenCalls,

    #[error("Step deduction already exists for ref {0}")]
    StepDeductExists(String),

    #[error("Step spend already exists for ref {0}")]
    StepSpendExists(String),

    #[error("No deduction recorded for ref {0}")]
    NoDeduct(String),

    #[error("No billing client configured")]
    NoBillingClient,

    #[error("Billing service failed to accept the workflow receipt")]
    ReceiptFailed,
}

/// Report registry lifecycle errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Report already exists for execution {0}")]
    ReportExists(String),

    #[error("Report not found for execution {0}")]
    ReportNotFound(String),
}

/// Errors a billing client may return
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BillingError {
    #[error("Billing transport failure: {0}")]
    Transport(String),

    #[error("Billing call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

impl From<serde_json::Error> for DonBillError {
    fn from(err: serde_json::Error) -> Self {
        DonBillError::Serialization(err.to_string())
    }
}

impl DonBillError {
    /// Whether this error is the given report kind
    pub fn is_report(&self, kind: &ReportError) -> bool {
        matches!(self, DonBillError::Report(inner) if inner == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_display() {
        let err = DonBillError::Registry(RegistryError::ReportNotFound("exec-1".to_string()));
        assert!(err.to_string().contains("exec-1"));
    }

    #[test]
    fn test_insufficient_balance_display() {
        let err = BalanceError::InsufficientBalance {
            required: dec!(5),
            available: dec!(2),
        };
        assert!(err.to_string().contains("required 5, available 2"));
    }

    #[test]
    fn test_kind_matching() {
        let err: DonBillError = ReportError::StepDeductExists("ref1".into()).into();
        assert!(err.is_report(&ReportError::StepDeductExists("ref1".into())));
        assert!(!err.is_report(&ReportError::NoReserve));
    }
}
