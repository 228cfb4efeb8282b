//! Scriptable processor gateway for tests.

use super::{
    ChargeAccepted, IntentionKind, MerchantCredentials, ProcessorError, ProcessorGateway,
    RefundAccepted, Settlement,
};
use crate::domain::Rail;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// What the mock gateway should do with the next charge or refund.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Card charges settle, bank charges initiate.
    Approve,
    Decline {
        reason_code: String,
        message: String,
    },
    Unavailable,
}

/// Record of a charge call, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeCall {
    pub token: String,
    pub amount_cents: i64,
    pub rail: Rail,
}

/// Record of a refund call, for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundCall {
    pub external_id: String,
    pub amount_cents: i64,
}

#[derive(Debug)]
pub struct MockGateway {
    behavior: Mutex<MockBehavior>,
    next_id: AtomicU64,
    charge_calls: Mutex<Vec<ChargeCall>>,
    refund_calls: Mutex<Vec<RefundCall>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(MockBehavior::Approve),
            next_id: AtomicU64::new(1),
            charge_calls: Mutex::new(Vec::new()),
            refund_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn charge_calls(&self) -> Vec<ChargeCall> {
        self.charge_calls.lock().unwrap().clone()
    }

    pub fn refund_calls(&self) -> Vec<RefundCall> {
        self.refund_calls.lock().unwrap().clone()
    }

    fn current_behavior(&self) -> MockBehavior {
        self.behavior.lock().unwrap().clone()
    }

    fn allocate_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessorGateway for MockGateway {
    async fn resolve_location(
        &self,
        credentials: &MerchantCredentials,
    ) -> Result<String, ProcessorError> {
        Ok(format!("loc-{}", credentials.user_id))
    }

    async fn create_intention(
        &self,
        _credentials: &MerchantCredentials,
        _location_id: &str,
        kind: IntentionKind,
        amount_cents: Option<i64>,
    ) -> Result<String, ProcessorError> {
        if kind == IntentionKind::Transaction && amount_cents.is_none() {
            return Err(ProcessorError::Protocol(
                "transaction intention requires an amount in cents".to_string(),
            ));
        }
        Ok(self.allocate_id("mock-token"))
    }

    async fn charge_token(
        &self,
        _credentials: &MerchantCredentials,
        token: &str,
        amount_cents: i64,
        rail: Rail,
        _reference: &str,
    ) -> Result<ChargeAccepted, ProcessorError> {
        self.charge_calls.lock().unwrap().push(ChargeCall {
            token: token.to_string(),
            amount_cents,
            rail,
        });

        match self.current_behavior() {
            MockBehavior::Approve => {
                let external_id = self.allocate_id("mock-tx");
                let settlement = match rail {
                    Rail::Card => Settlement::Settled,
                    Rail::Bank => Settlement::Initiated,
                };
                Ok(ChargeAccepted {
                    external_id: external_id.clone(),
                    settlement,
                    raw: serde_json::json!({
                        "data": { "id": external_id, "status_code": 101, "reason_code_id": 1000 }
                    }),
                })
            }
            MockBehavior::Decline {
                reason_code,
                message,
            } => Err(ProcessorError::Declined {
                reason_code: Some(reason_code),
                message,
                raw: Some(serde_json::json!({ "data": { "status_code": 301 } })),
            }),
            MockBehavior::Unavailable => Err(ProcessorError::Unavailable(
                "request timed out".to_string(),
            )),
        }
    }

    async fn refund(
        &self,
        _credentials: &MerchantCredentials,
        external_id: &str,
        amount_cents: i64,
    ) -> Result<RefundAccepted, ProcessorError> {
        self.refund_calls.lock().unwrap().push(RefundCall {
            external_id: external_id.to_string(),
            amount_cents,
        });

        match self.current_behavior() {
            MockBehavior::Approve => {
                let refund_id = self.allocate_id("mock-refund");
                Ok(RefundAccepted {
                    external_id: Some(refund_id.clone()),
                    raw: serde_json::json!({ "data": { "id": refund_id } }),
                })
            }
            MockBehavior::Decline {
                reason_code,
                message,
            } => Err(ProcessorError::Declined {
                reason_code: Some(reason_code),
                message,
                raw: None,
            }),
            MockBehavior::Unavailable => Err(ProcessorError::Unavailable(
                "request timed out".to_string(),
            )),
        }
    }
}
