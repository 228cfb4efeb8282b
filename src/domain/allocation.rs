//! Fund allocations: attribution of a transaction's amount to named funds.
//!
//! Allocation history is append-only; refunds add sign-negated rows that
//! mirror the original mix rather than deleting anything.

use crate::domain::money::Money;
use serde::{Deserialize, Serialize};

/// One allocation of a transaction (or a subscription template) to a fund.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundAllocation {
    pub fund_id: i64,
    pub amount: Money,
    pub fee: Money,
    pub net: Money,
}

impl FundAllocation {
    pub fn new(fund_id: i64, amount: Money, fee: Money, net: Money) -> Self {
        FundAllocation {
            fund_id,
            amount,
            fee,
            net,
        }
    }

    /// The sign-negated mirror of this allocation, used for refund rows.
    pub fn negated(&self) -> Self {
        FundAllocation {
            fund_id: self.fund_id,
            amount: -self.amount,
            fee: -self.fee,
            net: -self.net,
        }
    }
}

/// Sum of allocation amounts; must equal the transaction's gross.
pub fn allocation_total(allocations: &[FundAllocation]) -> Money {
    allocations
        .iter()
        .fold(Money::zero(), |acc, a| acc + a.amount)
}

/// Split a refund across the original allocation mix, proportionally.
///
/// Each allocation contributes `amount * refund_gross / original_gross`
/// (rounded to the cent); the final allocation absorbs the rounding
/// remainder so the rows sum exactly to `(refund_gross, refund_fee,
/// refund_net)`. Returned amounts are negative.
pub fn proportional_refund_allocations(
    originals: &[FundAllocation],
    original_gross: Money,
    refund_gross: Money,
    refund_fee: Money,
    refund_net: Money,
) -> Vec<FundAllocation> {
    if originals.is_empty() || original_gross.is_zero() {
        return Vec::new();
    }

    let ratio = refund_gross / original_gross;
    let mut rows = Vec::with_capacity(originals.len());
    let mut amount_left = refund_gross;
    let mut fee_left = refund_fee;
    let mut net_left = refund_net;

    for (i, original) in originals.iter().enumerate() {
        let last = i == originals.len() - 1;
        let (amount, fee, net) = if last {
            (amount_left, fee_left, net_left)
        } else {
            let amount = (original.amount * ratio).round_cents();
            let fee = (original.fee * ratio).round_cents();
            let net = (original.net * ratio).round_cents();
            amount_left = amount_left - amount;
            fee_left = fee_left - fee;
            net_left = net_left - net;
            (amount, fee, net)
        };
        rows.push(FundAllocation::new(original.fund_id, -amount, -fee, -net));
    }

    rows
}
