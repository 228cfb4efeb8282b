//! Processor gateway abstraction: translates ledger intents into payment
//! processor calls and normalizes the results.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::domain::Rail;

pub mod fortis;
pub mod mock;

pub use fortis::FortisGateway;
pub use mock::{MockBehavior, MockGateway};

/// Per-merchant processor credentials, consumed as-is. Obtaining them is
/// the onboarding subsystem's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantCredentials {
    pub user_id: String,
    pub user_api_key: String,
}

/// Which processor-side collection mode an intention uses.
///
/// `Transaction` charges immediately; `Ticket` tokenizes now for a later
/// charge (subscription setup, saving a payment method). The choice is
/// the caller's policy, not the gateway's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentionKind {
    Transaction,
    Ticket,
}

/// How an accepted charge settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Card rail: funds captured synchronously.
    Settled,
    /// Bank rail: debit initiated; the terminal outcome arrives later
    /// out-of-band.
    Initiated,
}

/// A charge the processor accepted.
#[derive(Debug, Clone)]
pub struct ChargeAccepted {
    pub external_id: String,
    pub settlement: Settlement,
    /// Opaque processor response, stored for audit.
    pub raw: Value,
}

/// A refund the processor accepted.
#[derive(Debug, Clone)]
pub struct RefundAccepted {
    pub external_id: Option<String>,
    pub raw: Value,
}

/// Gateway failure modes.
///
/// `Unavailable` means the outcome is unknown (transport error, timeout,
/// processor outage): the caller must leave the transaction unresolved
/// rather than guessing. `Declined` is permanent for the attempt, with
/// the processor's reason code preserved verbatim.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor unavailable: {0}")]
    Unavailable(String),
    #[error("{message}")]
    Declined {
        reason_code: Option<String>,
        message: String,
        raw: Option<Value>,
    },
    #[error("unexpected processor response: {0}")]
    Protocol(String),
}

/// External payment processor operations used by the ledger.
///
/// Implementations are stateless apart from caching resolved merchant
/// location identifiers. No internal retries: transient-failure policy
/// belongs to callers and the external reconciliation job.
#[async_trait]
pub trait ProcessorGateway: Send + Sync + fmt::Debug {
    /// Look up the merchant's processing location, caching the result for
    /// future calls by the same merchant. Idempotent; safe to call
    /// concurrently (duplicate cache writes are harmless).
    async fn resolve_location(
        &self,
        credentials: &MerchantCredentials,
    ) -> Result<String, ProcessorError>;

    /// Create a payment-form intention and return its client token.
    ///
    /// `amount_cents` is required for `IntentionKind::Transaction` and
    /// ignored for `IntentionKind::Ticket`.
    async fn create_intention(
        &self,
        credentials: &MerchantCredentials,
        location_id: &str,
        kind: IntentionKind,
        amount_cents: Option<i64>,
    ) -> Result<String, ProcessorError>;

    /// Execute an immediate sale against a previously tokenized source.
    async fn charge_token(
        &self,
        credentials: &MerchantCredentials,
        token: &str,
        amount_cents: i64,
        rail: Rail,
        reference: &str,
    ) -> Result<ChargeAccepted, ProcessorError>;

    /// Refund part or all of a prior charge. Amount validation against
    /// the remaining refundable balance happens before this call.
    async fn refund(
        &self,
        credentials: &MerchantCredentials,
        external_id: &str,
        amount_cents: i64,
    ) -> Result<RefundAccepted, ProcessorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processor_error_display() {
        let err = ProcessorError::Unavailable("connection timed out".to_string());
        assert_eq!(
            err.to_string(),
            "processor unavailable: connection timed out"
        );

        let err = ProcessorError::Declined {
            reason_code: Some("1616".to_string()),
            message: "Payment declined: NSF".to_string(),
            raw: None,
        };
        assert_eq!(err.to_string(), "Payment declined: NSF");
    }
}
