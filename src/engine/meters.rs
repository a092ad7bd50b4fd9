//! Award accounting for the current round.
//!
//! Amounts are tracked as exact rationals so denomination conversions
//! never lose sub-unit credit. The three meters persist together in one
//! payvar record and are restored verbatim on recovery.

use crate::critical_data::CriticalDataScope;
use crate::errors::Result;
use crate::shim::{paths, FoundationShim};
use serde::{Deserialize, Serialize};

/// Exact non-negative rational amount, kept in lowest terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    numerator: i64,
    denominator: i64,
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs().max(1)
}

impl Rational {
    pub const ZERO: Rational = Rational {
        numerator: 0,
        denominator: 1,
    };

    pub fn from_units(units: i64) -> Self {
        Self {
            numerator: units,
            denominator: 1,
        }
    }

    pub fn new(numerator: i64, denominator: i64) -> Self {
        debug_assert!(denominator > 0);
        let divisor = gcd(numerator, denominator);
        Self {
            numerator: numerator / divisor,
            denominator: denominator / divisor,
        }
    }

    pub fn add(self, other: Rational) -> Rational {
        Rational::new(
            self.numerator * other.denominator + other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }

    /// Whole units, truncating any fractional remainder.
    pub fn units(self) -> i64 {
        self.numerator / self.denominator
    }

    pub fn is_zero(self) -> bool {
        self.numerator == 0
    }
}

/// The round's award meters.
///
/// `cycle` is the current evaluate/adjust pass, `total` accumulates
/// across passes and gamble steps, `wagerable` is the part of the total
/// the player may stake in ancillary play.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardMeters {
    pub cycle: Rational,
    pub total: Rational,
    pub wagerable: Rational,
}

impl Default for AwardMeters {
    fn default() -> Self {
        Self {
            cycle: Rational::ZERO,
            total: Rational::ZERO,
            wagerable: Rational::ZERO,
        }
    }
}

impl AwardMeters {
    /// Restores the persisted meters, or zeroes when none exist.
    pub fn load(shim: &FoundationShim) -> Result<Self> {
        Ok(shim
            .read(CriticalDataScope::Payvar, paths::TOTAL_AWARD)?
            .unwrap_or_default())
    }

    /// Persists all three meters. Requires an open transaction.
    pub fn store(&self, shim: &FoundationShim) -> Result<()> {
        shim.write(CriticalDataScope::Payvar, paths::TOTAL_AWARD, self)
    }

    /// Folds one pass's non-risk winnings into the meters.
    pub fn apply_step(&mut self, amount: Rational) {
        self.cycle = amount;
        self.total = self.total.add(amount);
    }

    /// Marks the whole running total as stakeable.
    pub fn mark_wagerable(&mut self) {
        self.wagerable = self.total;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical_data::PassthroughCriticalData;
    use crate::foundation::{CreateTransactionResult, Foundation, StandaloneFoundation};

    #[test]
    fn rational_arithmetic_stays_reduced() {
        let half = Rational::new(1, 2);
        let quarter = Rational::new(25, 100);
        let sum = half.add(quarter);
        assert_eq!(sum, Rational::new(3, 4));
        assert_eq!(sum.units(), 0);
        assert_eq!(Rational::from_units(7).add(half).units(), 7);
    }

    #[test]
    fn apply_step_accumulates_into_total() {
        let mut meters = AwardMeters::default();
        meters.apply_step(Rational::from_units(40));
        meters.apply_step(Rational::from_units(10));
        assert_eq!(meters.cycle.units(), 10);
        assert_eq!(meters.total.units(), 50);
        assert!(meters.wagerable.is_zero());

        meters.mark_wagerable();
        assert_eq!(meters.wagerable.units(), 50);
    }

    #[test]
    fn meters_survive_a_store_round_trip() {
        let foundation = StandaloneFoundation::in_memory();
        let raw = Box::new(PassthroughCriticalData::new(foundation.clone()));
        let shim = FoundationShim::new(foundation.clone(), raw);

        let mut meters = AwardMeters::default();
        meters.apply_step(Rational::new(3, 2));
        meters.mark_wagerable();

        assert_eq!(
            foundation.create_transaction(),
            CreateTransactionResult::Created
        );
        meters.store(&shim).unwrap();
        foundation.close_transaction();

        assert_eq!(AwardMeters::load(&shim).unwrap(), meters);
    }
}
