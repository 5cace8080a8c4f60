//! Fault-tolerant spend aggregation
//!
//! Every node of a DON reports what a step cost independently. Taking the
//! median per resource unit keeps a minority of misreporting nodes from
//! moving the settled amount.

use donbill_common::{parse_decimal, MeteringNodeDetail};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::warn;

/// Median of the given values.
///
/// Odd count: middle element. Even count: mean of the two middle elements.
/// Empty input yields zero.
pub fn median_spend(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        midpoint(sorted[mid - 1], sorted[mid])
    }
}

/// Mean of two values that cannot overflow on extreme inputs
fn midpoint(lo: Decimal, hi: Decimal) -> Decimal {
    match lo.checked_add(hi) {
        Some(sum) => sum / Decimal::TWO,
        None => (lo / Decimal::TWO).checked_add(hi / Decimal::TWO).unwrap_or(hi),
    }
}

/// Per-unit medians of a set of node reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitMedians {
    /// Resource unit -> median reported spend
    pub medians: BTreeMap<String, Decimal>,
    /// Reports whose spend value was unusable
    pub dropped: Vec<MeteringNodeDetail>,
}

impl UnitMedians {
    pub fn is_empty(&self) -> bool {
        self.medians.is_empty()
    }
}

/// Parse, group by spend unit, and take the median of each group.
///
/// Values that fail to parse, or are negative, are dropped rather than
/// failing the whole aggregation.
pub fn median_by_unit(nodes: &[MeteringNodeDetail]) -> UnitMedians {
    let mut by_unit: BTreeMap<&str, Vec<Decimal>> = BTreeMap::new();
    let mut dropped = Vec::new();

    for node in nodes {
        match parse_decimal(&node.spend_value) {
            Some(value) if value >= Decimal::ZERO => {
                by_unit.entry(node.spend_unit.as_str()).or_default().push(value);
            }
            _ => {
                warn!(
                    peer_id = %node.peer_2_peer_id,
                    unit = %node.spend_unit,
                    value = %node.spend_value,
                    "Dropping unusable node spend value"
                );
                dropped.push(node.clone());
            }
        }
    }

    let medians = by_unit
        .into_iter()
        .map(|(unit, values)| (unit.to_string(), median_spend(&values)))
        .collect();

    UnitMedians { medians, dropped }
}
