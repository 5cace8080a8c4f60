//! Balance store - credit balance with per-unit conversion rates
//!
//! Credits are the account's fungible billing unit. Capabilities spend in
//! their own resource units (compute time, bytes written, ...), converted to
//! credits through the rates the billing service hands out at reservation.
//!
//! The store fails open: a unit with no known rate is converted 1:1 and the
//! store permanently enters metering mode, after which insufficient funds
//! never block a debit.

use crate::metrics::{FailOpenReason, MeteringMetrics};
use donbill_common::BalanceError;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether the store enforces its balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceMode {
    /// Debits are checked against the balance
    Funded,
    /// Debits always succeed and may drive the balance negative
    Metered,
}

#[derive(Debug)]
struct BalanceState {
    balance: Decimal,
    mode: BalanceMode,
}

/// Thread-safe credit balance
///
/// Mode only ever moves from `Funded` to `Metered`.
#[derive(Debug)]
pub struct BalanceStore {
    state: RwLock<BalanceState>,
    /// Credits per resource unit, all strictly positive
    conversions: HashMap<String, Decimal>,
    metrics: Option<Arc<MeteringMetrics>>,
}

impl BalanceStore {
    /// Create a store with an initial balance and conversion rates.
    ///
    /// Non-positive rates are dropped.
    pub fn new<I, S>(balance: Decimal, conversions: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let conversions = conversions
            .into_iter()
            .filter_map(|(unit, rate)| {
                let unit = unit.into();
                if rate <= Decimal::ZERO {
                    warn!(unit = %unit, rate = %rate, "Dropping non-positive conversion rate");
                    None
                } else {
                    Some((unit, rate))
                }
            })
            .collect();

        Self {
            state: RwLock::new(BalanceState {
                balance,
                mode: BalanceMode::Funded,
            }),
            conversions,
            metrics: None,
        }
    }

    /// Zero balance, no rates
    pub fn empty() -> Self {
        Self::new(Decimal::ZERO, std::iter::empty::<(String, Decimal)>())
    }

    /// Attach metrics for fail-open transitions
    pub fn with_metrics(mut self, metrics: Arc<MeteringMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current balance in credits
    pub fn get(&self) -> Decimal {
        self.state.read().balance
    }

    /// Current balance expressed in `unit`, never negative
    pub fn get_as(&self, unit: &str) -> Decimal {
        let balance = self.get();
        if balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.convert_from_balance(unit, balance)
    }

    pub fn mode(&self) -> BalanceMode {
        self.state.read().mode
    }

    #[inline]
    pub fn is_metering_mode(&self) -> bool {
        self.mode() == BalanceMode::Metered
    }

    /// Whether a rate is known for `unit`, without side effects
    pub fn has_rate(&self, unit: &str) -> bool {
        self.conversions.contains_key(unit)
    }

    /// Convert `amount` of `unit` into credits
    pub fn convert_to_balance(&self, unit: &str, amount: Decimal) -> Decimal {
        let rate = self.rate_for(unit);
        amount.checked_mul(rate).unwrap_or_else(|| {
            warn!(unit = %unit, amount = %amount, "Credit conversion overflowed");
            Decimal::MAX
        })
    }

    /// Convert `amount` credits into `unit`
    pub fn convert_from_balance(&self, unit: &str, amount: Decimal) -> Decimal {
        let rate = self.rate_for(unit);
        amount.checked_div(rate).unwrap_or_else(|| {
            warn!(unit = %unit, amount = %amount, "Unit conversion overflowed");
            Decimal::MAX
        })
    }

    /// Subtract credits from the balance
    pub fn minus(&self, amount: Decimal) -> Result<(), BalanceError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceError::InvalidAmount);
        }

        let mut state = self.state.write();
        if state.mode == BalanceMode::Funded && state.balance < amount {
            return Err(BalanceError::InsufficientBalance {
                required: amount,
                available: state.balance,
            });
        }

        state.balance = debit(state.balance, amount);
        Ok(())
    }

    /// Subtract an amount of `unit` from the balance
    pub fn minus_as(&self, unit: &str, amount: Decimal) -> Result<(), BalanceError> {
        if amount <= Decimal::ZERO {
            return Err(BalanceError::InvalidAmount);
        }
        self.minus(self.convert_to_balance(unit, amount))
    }

    /// Add credits to the balance
    pub fn add(&self, amount: Decimal) -> Result<(), BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::InvalidAmount);
        }

        let mut state = self.state.write();
        let balance = state.balance;
        state.balance = balance.checked_add(amount).unwrap_or_else(|| {
            warn!(balance = %balance, amount = %amount, "Balance credit overflowed, saturating");
            Decimal::MAX
        });
        Ok(())
    }

    /// Add an amount of `unit` to the balance
    pub fn add_as(&self, unit: &str, amount: Decimal) -> Result<(), BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::InvalidAmount);
        }
        self.add(self.convert_to_balance(unit, amount))
    }

    /// Stop enforcing the balance. Idempotent.
    pub fn allow_negative(&self) {
        self.enter_metering_mode(FailOpenReason::Forced);
    }

    /// Subtract as much of `amount` as the balance covers.
    ///
    /// Returns the uncovered shortfall. Outside metering mode the balance
    /// bottoms out at zero.
    pub(crate) fn minus_saturating(&self, amount: Decimal) -> Decimal {
        if amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let mut state = self.state.write();
        if state.mode == BalanceMode::Metered || state.balance >= amount {
            state.balance = debit(state.balance, amount);
            return Decimal::ZERO;
        }

        let covered = state.balance.max(Decimal::ZERO);
        state.balance -= covered;
        amount - covered
    }

    pub(crate) fn enter_metering_mode(&self, reason: FailOpenReason) {
        let mut state = self.state.write();
        if state.mode == BalanceMode::Metered {
            return;
        }
        state.mode = BalanceMode::Metered;
        drop(state);

        debug!(reason = reason.as_str(), "Balance store entered metering mode");
        if let Some(metrics) = &self.metrics {
            metrics.record_fail_open(reason);
        }
    }

    /// Rate for `unit`; a miss is logged and enters metering mode
    pub(crate) fn lookup_rate(&self, unit: &str) -> Option<Decimal> {
        let rate = self.conversions.get(unit).copied();
        if rate.is_none() {
            warn!(unit = %unit, "No conversion rate for unit, entering metering mode");
            self.enter_metering_mode(FailOpenReason::UnknownUnit);
        }
        rate
    }

    fn rate_for(&self, unit: &str) -> Decimal {
        self.lookup_rate(unit).unwrap_or(Decimal::ONE)
    }
}

/// Subtract without panicking; an unbounded metered debit saturates
fn debit(balance: Decimal, amount: Decimal) -> Decimal {
    balance.checked_sub(amount).unwrap_or_else(|| {
        warn!(balance = %balance, amount = %amount, "Balance debit overflowed, saturating");
        Decimal::MIN
    })
}

impl Default for BalanceStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for BalanceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        write!(
            f,
            "BalanceStore(balance={}, mode={:?}, units={})",
            state.balance,
            state.mode,
            self.conversions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn store(balance: Decimal) -> BalanceStore {
        BalanceStore::new(balance, [("compute", dec!(2)), ("storage", dec!(0.5))])
    }

    fn metered(balance: Decimal) -> BalanceStore {
        let store = store(balance);
        store.allow_negative();
        store
    }

    #[test]
    fn test_new_drops_non_positive_rates() {
        let store = BalanceStore::new(dec!(10), [("good", dec!(1)), ("zero", dec!(0)), ("neg", dec!(-3))]);
        assert!(store.has_rate("good"));
        assert!(!store.has_rate("zero"));
        assert!(!store.has_rate("neg"));
        assert!(!store.is_metering_mode());
    }

    #[test]
    fn test_get_as() {
        let store = store(dec!(100));
        assert_eq!(store.get(), dec!(100));
        assert_eq!(store.get_as("compute"), dec!(50));
        assert_eq!(store.get_as("storage"), dec!(200));
    }

    #[test]
    fn test_get_as_non_positive_balance_is_zero() {
        let store = store(dec!(1));
        store.allow_negative();
        store.minus(dec!(5)).unwrap();
        assert_eq!(store.get(), dec!(-4));
        assert_eq!(store.get_as("compute"), Decimal::ZERO);
    }

    #[test]
    fn test_conversion_round_trip() {
        let store = store(dec!(0));
        for x in [dec!(1), dec!(7.25), dec!(1000), dec!(0.001)] {
            let units = store.convert_from_balance("compute", x);
            assert_eq!(store.convert_to_balance("compute", units), x);
        }
        assert!(!store.is_metering_mode());
    }

    #[test]
    fn test_unknown_unit_falls_back_to_one_to_one() {
        let store = store(dec!(10));
        assert_eq!(store.convert_to_balance("gpu", dec!(3)), dec!(3));
        assert!(store.is_metering_mode());

        // repeated misses are harmless
        assert_eq!(store.convert_from_balance("gpu", dec!(3)), dec!(3));
        assert_eq!(store.mode(), BalanceMode::Metered);
    }

    #[test]
    fn test_minus_then_add_restores_balance() {
        let store = store(dec!(100));
        store.minus(dec!(30)).unwrap();
        assert_eq!(store.get(), dec!(70));
        store.add(dec!(30)).unwrap();
        assert_eq!(store.get(), dec!(100));
    }

    #[test]
    fn test_minus_insufficient_leaves_balance_unchanged() {
        let store = store(dec!(10));
        let result = store.minus(dec!(11));
        assert!(matches!(result, Err(BalanceError::InsufficientBalance { .. })));
        assert_eq!(store.get(), dec!(10));
    }

    #[test]
    fn test_invalid_amounts() {
        let store = store(dec!(10));
        assert_eq!(store.minus(dec!(0)), Err(BalanceError::InvalidAmount));
        assert_eq!(store.minus(dec!(-1)), Err(BalanceError::InvalidAmount));
        assert_eq!(store.add(dec!(-1)), Err(BalanceError::InvalidAmount));
        assert_eq!(store.minus_as("compute", dec!(0)), Err(BalanceError::InvalidAmount));
        assert_eq!(store.add_as("compute", dec!(-1)), Err(BalanceError::InvalidAmount));

        // adding zero is allowed
        assert!(store.add(dec!(0)).is_ok());
        assert_eq!(store.get(), dec!(10));
    }

    #[test]
    fn test_unit_scaled_operations() {
        let store = store(dec!(100));
        store.minus_as("compute", dec!(10)).unwrap();
        assert_eq!(store.get(), dec!(80));
        store.add_as("storage", dec!(10)).unwrap();
        assert_eq!(store.get(), dec!(85));
    }

    #[test]
    fn test_metering_mode_allows_negative() {
        let store = store(dec!(5));
        store.allow_negative();
        store.allow_negative();
        store.minus(dec!(8)).unwrap();
        assert_eq!(store.get(), dec!(-3));
    }

    #[test]
    fn test_minus_saturating() {
        let store = store(dec!(5));
        assert_eq!(store.minus_saturating(dec!(3)), dec!(0));
        assert_eq!(store.get(), dec!(2));
        assert_eq!(store.minus_saturating(dec!(7)), dec!(5));
        assert_eq!(store.get(), dec!(0));
    }

    #[test]
    fn test_extreme_amounts_saturate() {
        let store = store(Decimal::MAX);
        store.add(dec!(1)).unwrap();
        assert_eq!(store.get(), Decimal::MAX);

        let store = metered(dec!(-10));
        store.minus(Decimal::MAX).unwrap();
        assert_eq!(store.get(), Decimal::MIN);

        let store = metered(dec!(-10));
        assert_eq!(store.minus_saturating(Decimal::MAX), dec!(0));
        assert_eq!(store.get(), Decimal::MIN);

        // metered debit of a saturated unit conversion
        let store = metered(dec!(0));
        store.minus_as("compute", Decimal::MAX).unwrap();
        store.minus_as("compute", Decimal::MAX).unwrap();
        assert_eq!(store.get(), Decimal::MIN);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let store = Arc::new(store(dec!(100)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || (0..20).filter(|_| store.minus(dec!(1)).is_ok()).count())
            })
            .collect();

        let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(succeeded, 100);
        assert_eq!(store.get(), dec!(0));
    }
}
