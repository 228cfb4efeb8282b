//! Fee calculation: percentage-plus-fixed schedules applied to a gross amount.

use crate::domain::money::Money;
use rust_decimal::Decimal;
use thiserror::Error;

/// A processing fee schedule: `fee = round(gross * percentage + fixed, 2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Fractional percentage rate, in [0, 1] (0.023 = 2.3%).
    pub percentage: Decimal,
    /// Fixed per-transaction fee in dollars.
    pub fixed: Money,
}

/// The fee split for one charge. Invariant: `fee + net == gross` to the cent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("gross amount must not be negative, got {0}")]
    NegativeGross(Money),
    #[error("percentage rate must be within [0, 1], got {0}")]
    RateOutOfRange(Decimal),
}

impl FeeSchedule {
    pub fn new(percentage: Decimal, fixed: Money) -> Self {
        FeeSchedule { percentage, fixed }
    }

    /// Compute the fee and net for a gross amount.
    ///
    /// Rounds the fee half away from zero to whole cents. Called exactly
    /// once per charge; the result is persisted, never recomputed later,
    /// since schedules can change.
    ///
    /// # Errors
    /// Returns `FeeError` for a negative gross or a rate outside [0, 1].
    pub fn compute(&self, gross: Money) -> Result<FeeBreakdown, FeeError> {
        if gross.is_negative() {
            return Err(FeeError::NegativeGross(gross));
        }
        if self.percentage < Decimal::ZERO || self.percentage > Decimal::ONE {
            return Err(FeeError::RateOutOfRange(self.percentage));
        }

        let fee = (Money::new(gross.inner() * self.percentage) + self.fixed).round_cents();
        let net = gross - fee;

        Ok(FeeBreakdown { gross, fee, net })
    }
}

/// Fee share carried by a refund, proportional to the refunded gross.
///
/// Rounded half away from zero exactly once; the refund's net is the
/// difference, so fee + net still equals the refunded gross.
pub fn proportional_refund_fee(
    original_fee: Money,
    original_gross: Money,
    refund_gross: Money,
) -> Money {
    (original_fee * refund_gross / original_gross).round_cents()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn standard_schedule() -> FeeSchedule {
        FeeSchedule::new(
            Decimal::from_str("0.023").unwrap(),
            Money::from_str_canonical("0.30").unwrap(),
        )
    }

    #[test]
    fn test_fee_hundred_dollars() {
        let breakdown = standard_schedule()
            .compute(Money::from_str_canonical("100").unwrap())
            .unwrap();

        assert_eq!(breakdown.fee.to_canonical_string(), "2.6");
        assert_eq!(breakdown.net.to_canonical_string(), "97.4");
    }

    #[test]
    fn test_fee_plus_net_equals_gross() {
        let schedule = standard_schedule();
        for amount in ["0.01", "1", "19.99", "50", "123.45", "9999.99"] {
            let gross = Money::from_str_canonical(amount).unwrap();
            let breakdown = schedule.compute(gross).unwrap();
            assert_eq!(
                breakdown.fee + breakdown.net,
                gross,
                "fee+net != gross for {}",
                amount
            );
        }
    }

    #[test]
    fn test_fee_rounds_half_away_from_zero() {
        // 50 * 0.023 + 0.30 = 1.45 exactly; 10.87 * 0.023 + 0.30 = 0.55001
        let schedule = standard_schedule();
        let breakdown = schedule
            .compute(Money::from_str_canonical("50").unwrap())
            .unwrap();
        assert_eq!(breakdown.fee.to_canonical_string(), "1.45");

        // 0.023 * 2.50 + 0.30 = 0.3575 -> 0.36
        let breakdown = schedule
            .compute(Money::from_str_canonical("2.50").unwrap())
            .unwrap();
        assert_eq!(breakdown.fee.to_canonical_string(), "0.36");
    }

    #[test]
    fn test_negative_gross_rejected() {
        let result = standard_schedule().compute(Money::from_str_canonical("-5").unwrap());
        assert!(matches!(result, Err(FeeError::NegativeGross(_))));
    }

    #[test]
    fn test_rate_out_of_range_rejected() {
        let schedule = FeeSchedule::new(Decimal::from_str("1.5").unwrap(), Money::zero());
        let result = schedule.compute(Money::from_str_canonical("10").unwrap());
        assert!(matches!(result, Err(FeeError::RateOutOfRange(_))));

        let schedule = FeeSchedule::new(Decimal::from_str("-0.1").unwrap(), Money::zero());
        let result = schedule.compute(Money::from_str_canonical("10").unwrap());
        assert!(matches!(result, Err(FeeError::RateOutOfRange(_))));
    }

    #[test]
    fn test_proportional_refund_fee_rounds_once() {
        // 2.60 * 40 / 100 = 1.04 exactly
        let fee = proportional_refund_fee(
            Money::from_str_canonical("2.60").unwrap(),
            Money::from_str_canonical("100").unwrap(),
            Money::from_str_canonical("40").unwrap(),
        );
        assert_eq!(fee.to_canonical_string(), "1.04");

        // 3.14 * 23.45 / 123.45 = 0.59656... -> 0.60
        let fee = proportional_refund_fee(
            Money::from_str_canonical("3.14").unwrap(),
            Money::from_str_canonical("123.45").unwrap(),
            Money::from_str_canonical("23.45").unwrap(),
        );
        assert_eq!(fee.to_canonical_string(), "0.6");
    }

    #[test]
    fn test_zero_gross_allowed() {
        let breakdown = standard_schedule().compute(Money::zero()).unwrap();
        assert_eq!(breakdown.fee.to_canonical_string(), "0.3");
        assert_eq!(breakdown.net.to_canonical_string(), "-0.3");
    }
}
