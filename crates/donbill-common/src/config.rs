//! Metering configuration

use crate::error::{DonBillError, Result};
use crate::types::decimal::{MAX_PRECISION, SPEND_LIMIT_PRECISION, SPEND_VALUE_PRECISION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Metering core configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Decimal places for serialized node spend values
    pub spend_value_precision: u32,
    /// Decimal places for published capability spend limits
    pub spend_limit_precision: u32,
    /// Deadline for a single billing call in milliseconds (0 disables)
    pub billing_timeout_ms: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            spend_value_precision: SPEND_VALUE_PRECISION,
            spend_limit_precision: SPEND_LIMIT_PRECISION,
            billing_timeout_ms: 0,
        }
    }
}

impl MeteringConfig {
    /// Load configuration from environment and `.env`
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse leave the default in place.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(val) = lookup("DONBILL_SPEND_VALUE_PRECISION") {
            if let Ok(v) = val.trim().parse() {
                cfg.spend_value_precision = v;
            }
        }
        if let Some(val) = lookup("DONBILL_SPEND_LIMIT_PRECISION") {
            if let Ok(v) = val.trim().parse() {
                cfg.spend_limit_precision = v;
            }
        }
        if let Some(val) = lookup("DONBILL_BILLING_TIMEOUT_MS") {
            if let Ok(v) = val.trim().parse() {
                cfg.billing_timeout_ms = v;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject precisions a decimal cannot hold
    pub fn validate(&self) -> Result<()> {
        if self.spend_value_precision > MAX_PRECISION {
            return Err(DonBillError::Config(format!(
                "spend_value_precision {} exceeds {}",
                self.spend_value_precision, MAX_PRECISION
            )));
        }
        if self.spend_limit_precision > MAX_PRECISION {
            return Err(DonBillError::Config(format!(
                "spend_limit_precision {} exceeds {}",
                self.spend_limit_precision, MAX_PRECISION
            )));
        }
        Ok(())
    }

    /// Billing call deadline, if one is configured
    pub fn billing_timeout(&self) -> Option<Duration> {
        (self.billing_timeout_ms > 0).then(|| Duration::from_millis(self.billing_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = MeteringConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, MeteringConfig::default());
        assert_eq!(cfg.spend_value_precision, 18);
        assert_eq!(cfg.spend_limit_precision, 3);
        assert!(cfg.billing_timeout().is_none());
    }

    #[test]
    fn test_env_overrides() {
        let cfg = MeteringConfig::from_lookup(lookup_from(&[
            ("DONBILL_SPEND_LIMIT_PRECISION", "6"),
            ("DONBILL_BILLING_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(cfg.spend_limit_precision, 6);
        assert_eq!(cfg.billing_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_unparseable_values_keep_defaults() {
        let cfg = MeteringConfig::from_lookup(lookup_from(&[(
            "DONBILL_SPEND_VALUE_PRECISION",
            "eighteen",
        )]))
        .unwrap();
        assert_eq!(cfg.spend_value_precision, 18);
    }

    #[test]
    fn test_precision_out_of_range() {
        let result = MeteringConfig::from_lookup(lookup_from(&[(
            "DONBILL_SPEND_VALUE_PRECISION",
            "40",
        )]));
        assert!(matches!(result, Err(DonBillError::Config(_))));
    }
}
