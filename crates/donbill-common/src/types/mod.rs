//! Core data types for DonBill

pub mod billing;
pub mod capability;
pub mod decimal;
pub mod metering;
