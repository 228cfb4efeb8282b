//! Ledger Writer: the single orchestrator for charges, ACH settlement,
//! and refunds.
//!
//! Every money movement follows the same shape: validate, write a unit of
//! work, talk to the processor, write the outcome in a second unit of
//! work, then enqueue a best-effort audit event. Processor unavailability
//! leaves the transaction `pending` for the external reconciliation job;
//! no path here retries on its own.

use crate::db::repo::Organization;
use crate::db::{NewCharge, RefundReservation, Repository};
use crate::domain::{
    allocation_total, proportional_refund_allocations, FeeSchedule, FundAllocation, Money,
    Transaction, TransactionKind, TransactionStatus,
};
use crate::error::AppError;
use crate::events::{event_type, AuditEvent, AuditLogger};
use crate::processor::{IntentionKind, ProcessorError, ProcessorGateway, Settlement};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// One charge to execute.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub organization_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub amount: Money,
    pub fund_id: i64,
    pub description: Option<String>,
    /// Caller-supplied dedupe key. Absent for scheduler-driven charges.
    pub idempotency_key: Option<String>,
    pub subscription_id: Option<i64>,
}

/// Terminal outcome relayed for an `ach_pending` transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchOutcome {
    Settled,
    Failed,
}

pub struct LedgerWriter {
    repo: Arc<Repository>,
    gateway: Arc<dyn ProcessorGateway>,
    fees: FeeSchedule,
    audit: AuditLogger,
}

impl LedgerWriter {
    pub fn new(
        repo: Arc<Repository>,
        gateway: Arc<dyn ProcessorGateway>,
        fees: FeeSchedule,
        audit: AuditLogger,
    ) -> Self {
        LedgerWriter {
            repo,
            gateway,
            fees,
            audit,
        }
    }

    /// Execute a charge end to end and return the final transaction row.
    pub async fn charge(&self, request: ChargeRequest) -> Result<Transaction, AppError> {
        if !request.amount.is_positive() {
            return Err(AppError::Validation(
                "charge amount must be positive".to_string(),
            ));
        }
        if !request.amount.fits_in_cents() {
            return Err(AppError::Validation(
                "charge amount exceeds the supported maximum".to_string(),
            ));
        }

        let org = self
            .repo
            .get_organization(request.organization_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("organization {}", request.organization_id))
            })?;

        let customer = self
            .repo
            .get_customer(request.customer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("customer {}", request.customer_id)))?;
        if customer.organization_id != org.id {
            return Err(AppError::Validation(
                "customer does not belong to organization".to_string(),
            ));
        }

        let source = self
            .repo
            .get_source(request.source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment source {}", request.source_id)))?;
        if source.customer_id != customer.id {
            return Err(AppError::Validation(
                "payment source does not belong to customer".to_string(),
            ));
        }
        if !source.is_active {
            return Err(AppError::Validation(
                "payment source is deactivated".to_string(),
            ));
        }

        if !self
            .repo
            .fund_belongs_to_organization(request.fund_id, org.id)
            .await?
        {
            return Err(AppError::Validation(
                "fund does not belong to organization".to_string(),
            ));
        }

        let idempotency_key_hash = match &request.idempotency_key {
            Some(key) => {
                let hash = hash_idempotency_key(key);
                if self
                    .repo
                    .find_transaction_by_idempotency_hash(&hash)
                    .await?
                    .is_some()
                {
                    return Err(AppError::Validation(
                        "idempotency key already used".to_string(),
                    ));
                }
                Some(hash)
            }
            None => None,
        };

        let breakdown = self.fees.compute(request.amount)?;
        let allocations = vec![FundAllocation::new(
            request.fund_id,
            breakdown.gross,
            breakdown.fee,
            breakdown.net,
        )];
        if allocation_total(&allocations) != breakdown.gross {
            return Err(AppError::InconsistentLedgerState(format!(
                "allocation total {} does not match gross {}",
                allocation_total(&allocations),
                breakdown.gross
            )));
        }

        let transaction_id = self
            .repo
            .insert_pending_charge(
                &NewCharge {
                    organization_id: org.id,
                    customer_id: Some(customer.id),
                    gross: breakdown.gross,
                    fee: breakdown.fee,
                    net: breakdown.net,
                    rail: source.rail,
                    description: request.description.clone(),
                    idempotency_key_hash,
                    subscription_id: request.subscription_id,
                },
                &allocations,
            )
            .await?;

        info!(
            transaction_id,
            organization_id = org.id,
            gross = %breakdown.gross,
            rail = %source.rail,
            "Charge created, calling processor"
        );

        let reference = request
            .description
            .clone()
            .unwrap_or_else(|| format!("charge-{}", transaction_id));
        let result = self
            .gateway
            .charge_token(
                &org.credentials,
                &source.processor_token,
                breakdown.gross.to_cents(),
                source.rail,
                &reference,
            )
            .await;

        match result {
            Ok(accepted) => {
                let (next_status, delta, event) = match accepted.settlement {
                    Settlement::Settled => (
                        TransactionStatus::Succeeded,
                        Some((
                            customer.id,
                            breakdown.gross,
                            breakdown.fee,
                            breakdown.net,
                        )),
                        event_type::PAYMENT_SUCCEEDED,
                    ),
                    Settlement::Initiated => {
                        (TransactionStatus::AchPending, None, event_type::ACH_PENDING)
                    }
                };

                let applied = self
                    .repo
                    .record_charge_outcome(
                        transaction_id,
                        next_status,
                        Some(&accepted.external_id),
                        Some(&accepted.raw),
                        delta,
                    )
                    .await?;
                if !applied {
                    return Err(AppError::InconsistentLedgerState(format!(
                        "transaction {} changed status during processor call",
                        transaction_id
                    )));
                }

                self.audit.emit(AuditEvent::new(
                    event,
                    Some(transaction_id),
                    Some(org.id),
                    serde_json::json!({
                        "gross": breakdown.gross,
                        "fee": breakdown.fee,
                        "net": breakdown.net,
                        "externalId": accepted.external_id,
                    }),
                ));

                self.load_transaction(transaction_id).await
            }
            Err(ProcessorError::Declined {
                reason_code,
                message,
                raw,
            }) => {
                let applied = self
                    .repo
                    .record_charge_outcome(
                        transaction_id,
                        TransactionStatus::Failed,
                        None,
                        raw.as_ref(),
                        None,
                    )
                    .await?;
                if !applied {
                    warn!(transaction_id, "Decline outcome lost to concurrent update");
                }

                self.audit.emit(AuditEvent::new(
                    event_type::PAYMENT_FAILED,
                    Some(transaction_id),
                    Some(org.id),
                    serde_json::json!({
                        "reasonCode": reason_code,
                        "message": message,
                    }),
                ));

                Err(AppError::ProcessorDeclined {
                    reason_code,
                    message,
                })
            }
            // Outcome unknown: the transaction stays pending for the
            // external reconciliation job.
            Err(ProcessorError::Unavailable(msg)) => {
                warn!(transaction_id, error = %msg, "Processor unavailable, charge left pending");
                Err(AppError::ProcessorUnavailable(msg))
            }
            Err(ProcessorError::Protocol(msg)) => {
                warn!(transaction_id, error = %msg, "Unexpected processor response, charge left pending");
                Err(AppError::ProcessorUnavailable(msg))
            }
        }
    }

    /// Apply an externally relayed ACH outcome to an `ach_pending` charge.
    pub async fn settle_ach(
        &self,
        transaction_id: i64,
        outcome: AchOutcome,
    ) -> Result<Transaction, AppError> {
        let tx = self
            .repo
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;

        if tx.status != TransactionStatus::AchPending {
            return Err(AppError::Validation(format!(
                "transaction {} is not awaiting settlement (status {})",
                transaction_id, tx.status
            )));
        }

        let (next_status, delta, event) = match outcome {
            AchOutcome::Settled => (
                TransactionStatus::Succeeded,
                tx.customer_id.map(|c| (c, tx.gross, tx.fee, tx.net)),
                event_type::ACH_SETTLED,
            ),
            AchOutcome::Failed => (TransactionStatus::Failed, None, event_type::ACH_FAILED),
        };

        let applied = self
            .repo
            .record_charge_outcome(transaction_id, next_status, None, None, delta)
            .await?;
        if !applied {
            return Err(AppError::Validation(format!(
                "transaction {} was settled concurrently",
                transaction_id
            )));
        }

        self.audit.emit(AuditEvent::new(
            event,
            Some(transaction_id),
            Some(tx.organization_id),
            serde_json::json!({ "gross": tx.gross }),
        ));

        self.load_transaction(transaction_id).await
    }

    /// Refund part or all of a settled charge. `amount` defaults to the
    /// full remaining refundable balance.
    ///
    /// The balance is claimed through a pending reservation before the
    /// processor call, so two concurrent requests cannot both send the
    /// same dollars upstream. A reservation whose processor refund fails
    /// is released.
    pub async fn refund(
        &self,
        transaction_id: i64,
        amount: Option<Money>,
    ) -> Result<Transaction, AppError> {
        let original = self
            .repo
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;

        if original.kind != TransactionKind::Payment {
            return Err(AppError::Validation(
                "only payments can be refunded".to_string(),
            ));
        }
        if let Some(requested) = amount {
            if !requested.is_positive() {
                return Err(AppError::Validation(
                    "refund amount must be positive".to_string(),
                ));
            }
        }
        // A fully refunded original is a balance-exhaustion case, not a
        // status violation.
        if original.status == TransactionStatus::Refunded {
            return Err(AppError::InsufficientRefundableBalance(format!(
                "transaction {} has nothing left to refund",
                transaction_id
            )));
        }
        if !original.status.is_refundable() {
            return Err(AppError::Validation(format!(
                "transaction {} is not refundable (status {})",
                transaction_id, original.status
            )));
        }
        let external_id = original.external_id.clone().ok_or_else(|| {
            AppError::Validation("transaction has no processor reference".to_string())
        })?;

        let org = self
            .repo
            .get_organization(original.organization_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("organization {}", original.organization_id))
            })?;

        let (refund_id, refund_gross, refund_fee, refund_net) =
            match self.repo.reserve_refund(&original, amount).await? {
                RefundReservation::Reserved {
                    refund_id,
                    gross,
                    fee,
                    net,
                } => (refund_id, gross, fee, net),
                RefundReservation::Exhausted { remaining } => {
                    return Err(AppError::InsufficientRefundableBalance(match amount {
                        Some(requested) if remaining.is_positive() => format!(
                            "requested {} but only {} remains refundable",
                            requested, remaining
                        ),
                        _ => format!(
                            "transaction {} has nothing left to refund",
                            transaction_id
                        ),
                    }))
                }
                RefundReservation::NotRefundable(status) => {
                    return Err(AppError::Validation(format!(
                        "transaction {} is not refundable (status {})",
                        transaction_id, status
                    )))
                }
            };

        let original_allocations = self.repo.get_allocations(transaction_id).await?;
        let refund_allocations = proportional_refund_allocations(
            &original_allocations,
            original.gross,
            refund_gross,
            refund_fee,
            refund_net,
        );
        if allocation_total(&refund_allocations) != -refund_gross {
            self.repo.release_refund(refund_id).await?;
            return Err(AppError::InconsistentLedgerState(format!(
                "refund allocation total {} does not match refund gross {}",
                allocation_total(&refund_allocations),
                refund_gross
            )));
        }

        // Only an accepted processor refund settles the reservation.
        let accepted = match self
            .gateway
            .refund(&org.credentials, &external_id, refund_gross.to_cents())
            .await
        {
            Ok(accepted) => accepted,
            Err(err) => {
                self.repo.release_refund(refund_id).await?;
                return Err(map_processor_error(err));
            }
        };

        let applied = self
            .repo
            .finalize_refund(
                &original,
                refund_id,
                accepted.external_id.as_deref(),
                &accepted.raw,
                &refund_allocations,
            )
            .await?;
        if !applied {
            return Err(AppError::InconsistentLedgerState(format!(
                "refund {} for transaction {} could not be recorded",
                refund_id, transaction_id
            )));
        }

        info!(
            transaction_id,
            refund_id,
            gross = %refund_gross,
            "Refund recorded"
        );

        self.audit.emit(AuditEvent::new(
            event_type::REFUND_SUCCEEDED,
            Some(refund_id),
            Some(org.id),
            serde_json::json!({
                "refundOf": transaction_id,
                "gross": refund_gross,
                "fee": refund_fee,
                "net": refund_net,
            }),
        ));

        self.load_transaction(refund_id).await
    }

    /// Create a processor payment-form intention for a merchant, resolving
    /// and caching the merchant's location on first use.
    pub async fn payment_intention(
        &self,
        organization_id: i64,
        kind: IntentionKind,
        amount: Option<Money>,
    ) -> Result<String, AppError> {
        let org = self
            .repo
            .get_organization(organization_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("organization {}", organization_id)))?;

        if kind == IntentionKind::Transaction {
            match amount {
                Some(a) if a.is_positive() && a.fits_in_cents() => {}
                _ => {
                    return Err(AppError::Validation(
                        "transaction intention requires a positive amount in cents range"
                            .to_string(),
                    ))
                }
            }
        }

        let location_id = self.location_for(&org).await?;
        self.gateway
            .create_intention(
                &org.credentials,
                &location_id,
                kind,
                amount.map(|a| a.to_cents()),
            )
            .await
            .map_err(map_processor_error)
    }

    async fn location_for(&self, org: &Organization) -> Result<String, AppError> {
        if let Some(location_id) = &org.location_id {
            return Ok(location_id.clone());
        }
        let location_id = self
            .gateway
            .resolve_location(&org.credentials)
            .await
            .map_err(map_processor_error)?;
        self.repo
            .set_organization_location(org.id, &location_id)
            .await?;
        Ok(location_id)
    }

    async fn load_transaction(&self, id: i64) -> Result<Transaction, AppError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("transaction {} vanished", id)))
    }
}

fn map_processor_error(err: ProcessorError) -> AppError {
    match err {
        ProcessorError::Unavailable(msg) => AppError::ProcessorUnavailable(msg),
        ProcessorError::Declined {
            reason_code,
            message,
            ..
        } => AppError::ProcessorDeclined {
            reason_code,
            message,
        },
        ProcessorError::Protocol(msg) => AppError::ProcessorUnavailable(msg),
    }
}

fn hash_idempotency_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}
