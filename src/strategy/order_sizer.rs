//! Batch planning for order placement
//!
//! Splits an outstanding size requirement into venue-legal orders: a number
//! of equal batches plus one trailing partial batch. Requirements and limits
//! are base units, planned sizes are contracts.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::Market;

/// Per-leg sizing inputs, all in base units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegSizing {
    /// Outstanding requirement (sign ignored)
    pub requirement: Decimal,
    pub contract_size: Decimal,
    pub min_size: Decimal,
    pub max_size: Option<Decimal>,
}

impl LegSizing {
    pub fn new(requirement: Decimal, market: &Market) -> Self {
        Self {
            requirement: requirement.abs(),
            contract_size: market.contract_size,
            min_size: market.min_size(),
            max_size: market.max_size(),
        }
    }
}

/// Orders to place for one leg, sizes in contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchPlan {
    pub order_count: u32,
    pub size: Decimal,
    pub trailing: Decimal,
}

impl BatchPlan {
    /// Total contracts covered by the plan
    pub fn total_contracts(&self) -> Decimal {
        Decimal::from(self.order_count) * self.size + self.trailing
    }

    /// Flattened list of order amounts in contracts
    pub fn amounts(&self) -> Vec<Decimal> {
        let mut amounts = vec![self.size; self.order_count as usize];
        if self.trailing > Decimal::ZERO {
            amounts.push(self.trailing);
        }
        amounts
    }

    pub fn is_empty(&self) -> bool {
        self.order_count == 0 && self.trailing.is_zero()
    }
}

/// Convert an ideal order notional into base units at `price`
pub fn ideal_size_for(ideal_value: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ideal_value / price
}

/// Plan batches for several legs sharing one ideal batch size.
///
/// The ideal is first clamped to the smallest outstanding requirement so
/// both legs move in comparable steps, then to each market's maximum.
pub fn plan_batches(legs: &[LegSizing], ideal_size: Decimal) -> Vec<BatchPlan> {
    let smallest = legs
        .iter()
        .map(|l| l.requirement)
        .filter(|r| *r > Decimal::ZERO)
        .min()
        .unwrap_or(Decimal::ZERO);
    let shared_ideal = if smallest > Decimal::ZERO {
        ideal_size.min(smallest)
    } else {
        ideal_size
    };
    legs.iter().map(|leg| plan_leg(leg, shared_ideal)).collect()
}

/// Plan batches for a single leg
pub fn plan_leg(leg: &LegSizing, ideal_size: Decimal) -> BatchPlan {
    let requirement = leg.requirement.abs();
    if requirement.is_zero() || leg.contract_size <= Decimal::ZERO {
        return BatchPlan::default();
    }

    let mut ideal = ideal_size.min(requirement);
    if let Some(max) = leg.max_size {
        ideal = ideal.min(max);
    }
    ideal = ideal.max(leg.min_size);

    let mut size = (ideal / leg.contract_size).floor();
    if let Some(max) = leg.max_size {
        // min_size may have lifted the ideal over a tiny maximum
        size = size.min((max / leg.contract_size).floor());
    }
    if size.is_zero() {
        return BatchPlan {
            order_count: 0,
            size,
            trailing: (requirement / leg.contract_size).round(),
        };
    }

    let batch = size * leg.contract_size;
    let order_count = (requirement / batch).floor();
    let remainder = requirement - order_count * batch;
    // rounding the remainder to whole contracts keeps the total within half a contract
    let mut trailing = (remainder / leg.contract_size).round();
    let mut count = order_count;
    if trailing >= size {
        count += Decimal::ONE;
        trailing -= size;
    }

    BatchPlan {
        order_count: count.to_u32().unwrap_or(0),
        size,
        trailing,
    }
}
