//! Transaction records and their status state machine.

use crate::domain::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment network for a charge: card or bank (ACH-style) debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rail {
    Card,
    Bank,
}

impl Rail {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rail::Card => "card",
            Rail::Bank => "bank",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card" => Some(Rail::Card),
            "bank" => Some(Rail::Bank),
            _ => None,
        }
    }
}

impl std::fmt::Display for Rail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a transaction row records a payment or a refund against one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Payment,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment" => Some(TransactionKind::Payment),
            "refund" => Some(TransactionKind::Refund),
            _ => None,
        }
    }
}

/// Transaction lifecycle status.
///
/// Legal transitions:
/// `pending -> succeeded | failed | ach_pending`,
/// `ach_pending -> succeeded | failed`,
/// `succeeded -> partially_refunded | refunded`,
/// `partially_refunded -> partially_refunded | refunded`.
/// No transition ever moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    AchPending,
    Succeeded,
    Failed,
    PartiallyRefunded,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::AchPending => "ach_pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
            TransactionStatus::PartiallyRefunded => "partially_refunded",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "ach_pending" => Some(TransactionStatus::AchPending),
            "succeeded" => Some(TransactionStatus::Succeeded),
            "failed" => Some(TransactionStatus::Failed),
            "partially_refunded" => Some(TransactionStatus::PartiallyRefunded),
            "refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Succeeded)
                | (Pending, Failed)
                | (Pending, AchPending)
                | (AchPending, Succeeded)
                | (AchPending, Failed)
                | (Succeeded, PartiallyRefunded)
                | (Succeeded, Refunded)
                | (PartiallyRefunded, PartiallyRefunded)
                | (PartiallyRefunded, Refunded)
        )
    }

    /// Statuses whose amounts count toward a customer's accumulated balance.
    pub fn counts_toward_balance(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Succeeded
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Refunded
        )
    }

    /// Whether a refund may be issued against a transaction in this status.
    pub fn is_refundable(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Succeeded | TransactionStatus::PartiallyRefunded
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempted movement of money.
///
/// Refunds are separate rows with negative gross/fee/net linked back to
/// the original via `refund_of_id`/`refunded_by_id`, never an in-place
/// mutation of the original's amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub organization_id: i64,
    pub customer_id: Option<i64>,
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
    pub rail: Rail,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub description: Option<String>,
    /// Processor-side transaction id; null until the processor responds.
    pub external_id: Option<String>,
    /// Opaque processor response, stored once for audit. Never parsed back
    /// into domain logic.
    pub raw_response: Option<serde_json::Value>,
    pub refund_of_id: Option<i64>,
    pub refunded_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Invariant check: net = gross - fee, to the cent.
    pub fn amounts_consistent(&self) -> bool {
        self.fee + self.net == self.gross
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Succeeded));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(AchPending));
        assert!(AchPending.can_transition_to(Succeeded));
        assert!(AchPending.can_transition_to(Failed));
        assert!(Succeeded.can_transition_to(PartiallyRefunded));
        assert!(Succeeded.can_transition_to(Refunded));
        assert!(PartiallyRefunded.can_transition_to(Refunded));
        assert!(PartiallyRefunded.can_transition_to(PartiallyRefunded));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        use TransactionStatus::*;
        assert!(!Succeeded.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Refunded.can_transition_to(Succeeded));
        assert!(!Refunded.can_transition_to(PartiallyRefunded));
        assert!(!AchPending.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Refunded));
    }

    #[test]
    fn test_balance_statuses() {
        use TransactionStatus::*;
        assert!(Succeeded.counts_toward_balance());
        assert!(PartiallyRefunded.counts_toward_balance());
        assert!(Refunded.counts_toward_balance());
        assert!(!Pending.counts_toward_balance());
        assert!(!AchPending.counts_toward_balance());
        assert!(!Failed.counts_toward_balance());
    }

    #[test]
    fn test_status_string_roundtrip() {
        use TransactionStatus::*;
        for status in [
            Pending,
            AchPending,
            Succeeded,
            Failed,
            PartiallyRefunded,
            Refunded,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_rail_roundtrip() {
        assert_eq!(Rail::parse("card"), Some(Rail::Card));
        assert_eq!(Rail::parse("bank"), Some(Rail::Bank));
        assert_eq!(Rail::parse("eth"), None);
        assert_eq!(Rail::Card.to_string(), "card");
    }
}
