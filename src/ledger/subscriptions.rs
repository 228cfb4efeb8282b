//! Recurring-charge execution on top of the Ledger Writer.
//!
//! Scheduling lives outside this service: an external scheduler decides
//! when to call `run_due`, and retry policy for failed charges is the
//! scheduler's because a failure never advances `next_payment_on`.

use crate::db::{NewSubscription, Repository};
use crate::domain::{Frequency, Money, Subscription, SubscriptionStatus, Transaction};
use crate::error::AppError;
use crate::events::{event_type, AuditEvent, AuditLogger};
use crate::ledger::writer::{ChargeRequest, LedgerWriter};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

/// A subscription about to be created.
#[derive(Debug, Clone)]
pub struct NewSubscriptionRequest {
    pub organization_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub fund_id: i64,
    pub amount: Money,
    pub frequency: Frequency,
}

/// Per-subscription result of a `run_due` sweep.
#[derive(Debug)]
pub struct SubscriptionOutcome {
    pub subscription_id: i64,
    pub result: Result<i64, String>,
}

pub struct SubscriptionService {
    repo: Arc<Repository>,
    writer: Arc<LedgerWriter>,
    audit: AuditLogger,
}

impl SubscriptionService {
    pub fn new(repo: Arc<Repository>, writer: Arc<LedgerWriter>, audit: AuditLogger) -> Self {
        SubscriptionService {
            repo,
            writer,
            audit,
        }
    }

    /// Create an active subscription due one frequency interval from now.
    pub async fn create(
        &self,
        request: NewSubscriptionRequest,
    ) -> Result<Subscription, AppError> {
        if !request.amount.is_positive() {
            return Err(AppError::Validation(
                "subscription amount must be positive".to_string(),
            ));
        }

        let customer = self
            .repo
            .get_customer(request.customer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("customer {}", request.customer_id)))?;
        if customer.organization_id != request.organization_id {
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
            .fund_belongs_to_organization(request.fund_id, request.organization_id)
            .await?
        {
            return Err(AppError::Validation(
                "fund does not belong to organization".to_string(),
            ));
        }

        let id = self
            .repo
            .insert_subscription(&NewSubscription {
                organization_id: request.organization_id,
                customer_id: request.customer_id,
                source_id: request.source_id,
                fund_id: request.fund_id,
                amount: request.amount,
                frequency: request.frequency,
                next_payment_on: request.frequency.advance(Utc::now()),
            })
            .await?;

        self.audit.emit(AuditEvent::new(
            event_type::SUBSCRIPTION_CREATED,
            None,
            Some(request.organization_id),
            serde_json::json!({
                "subscriptionId": id,
                "amount": request.amount,
                "frequency": request.frequency.as_str(),
            }),
        ));

        self.load(id).await
    }

    /// Cancel an active subscription, preserving its history.
    pub async fn cancel(&self, id: i64) -> Result<Subscription, AppError> {
        let sub = self.load(id).await?;
        if !self.repo.cancel_subscription(id).await? {
            return Err(AppError::Validation(format!(
                "subscription {} is not active",
                id
            )));
        }

        self.audit.emit(AuditEvent::new(
            event_type::SUBSCRIPTION_CANCELLED,
            None,
            Some(sub.organization_id),
            serde_json::json!({ "subscriptionId": id }),
        ));

        self.load(id).await
    }

    /// Reactivate a cancelled subscription with a fresh due date. Rejected
    /// when the funding source has been deactivated in the meantime.
    pub async fn reactivate(&self, id: i64) -> Result<Subscription, AppError> {
        let sub = self.load(id).await?;
        if sub.status != SubscriptionStatus::Cancelled {
            return Err(AppError::Validation(format!(
                "subscription {} is not cancelled",
                id
            )));
        }

        let source = self
            .repo
            .get_source(sub.source_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("payment source {}", sub.source_id)))?;
        if !source.is_active {
            return Err(AppError::Validation(
                "funding source is deactivated; attach an active source first".to_string(),
            ));
        }

        let next = sub.frequency.advance(Utc::now());
        if !self.repo.reactivate_subscription(id, next).await? {
            return Err(AppError::Validation(format!(
                "subscription {} is not cancelled",
                id
            )));
        }

        self.audit.emit(AuditEvent::new(
            event_type::SUBSCRIPTION_REACTIVATED,
            None,
            Some(sub.organization_id),
            serde_json::json!({ "subscriptionId": id }),
        ));

        self.load(id).await
    }

    /// Charge one due subscription through the standard charge flow.
    ///
    /// Success advances `next_payment_on` one interval from now (not from
    /// the prior due date) and bumps the success counter; any charge
    /// failure bumps the failure counter and leaves the due date alone.
    pub async fn charge_due(&self, id: i64) -> Result<Transaction, AppError> {
        let sub = self.load(id).await?;
        if sub.status != SubscriptionStatus::Active {
            return Err(AppError::Validation(format!(
                "subscription {} is not active",
                id
            )));
        }

        let result = self
            .writer
            .charge(ChargeRequest {
                organization_id: sub.organization_id,
                customer_id: sub.customer_id,
                source_id: sub.source_id,
                amount: sub.amount,
                fund_id: sub.fund_id,
                description: Some(format!("subscription {} {}", sub.id, sub.frequency)),
                idempotency_key: None,
                subscription_id: Some(sub.id),
            })
            .await;

        match result {
            Ok(tx) => {
                let next = sub.frequency.advance(Utc::now());
                self.repo
                    .record_subscription_outcome(id, true, Some(next))
                    .await?;

                info!(subscription_id = id, transaction_id = tx.id, "Scheduled charge succeeded");
                self.audit.emit(AuditEvent::new(
                    event_type::SUBSCRIPTION_CHARGED,
                    Some(tx.id),
                    Some(sub.organization_id),
                    serde_json::json!({ "subscriptionId": id, "gross": sub.amount }),
                ));
                Ok(tx)
            }
            Err(e) => {
                self.repo.record_subscription_outcome(id, false, None).await?;

                warn!(subscription_id = id, error = %e, "Scheduled charge failed");
                self.audit.emit(AuditEvent::new(
                    event_type::SUBSCRIPTION_CHARGE_FAILED,
                    None,
                    Some(sub.organization_id),
                    serde_json::json!({ "subscriptionId": id, "error": e.to_string() }),
                ));
                Err(e)
            }
        }
    }

    /// Charge every subscription due at `now`, independently. One failing
    /// subscription never stops the sweep.
    pub async fn run_due(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<SubscriptionOutcome>, AppError> {
        let due = self.repo.list_due_subscriptions(now).await?;
        info!(count = due.len(), "Running due subscriptions");

        let mut outcomes = Vec::with_capacity(due.len());
        for sub in due {
            let result = match self.charge_due(sub.id).await {
                Ok(tx) => Ok(tx.id),
                Err(e) => Err(e.to_string()),
            };
            outcomes.push(SubscriptionOutcome {
                subscription_id: sub.id,
                result,
            });
        }
        Ok(outcomes)
    }

    async fn load(&self, id: i64) -> Result<Subscription, AppError> {
        self.repo
            .get_subscription(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_db;
    use crate::db::NewSource;
    use crate::domain::{FeeSchedule, Rail, TransactionStatus};
    use crate::processor::{MockBehavior, MockGateway};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use tempfile::TempDir;

    struct Harness {
        service: SubscriptionService,
        repo: Arc<Repository>,
        gateway: Arc<MockGateway>,
        request: NewSubscriptionRequest,
        _temp: TempDir,
    }

    async fn setup() -> Harness {
        let (repo, temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let gateway = Arc::new(MockGateway::new());

        let organization_id = repo.insert_organization("Org", "u", "k").await.unwrap();
        let customer_id = repo
            .insert_customer(organization_id, "c@example.com", "C", "D")
            .await
            .unwrap();
        let fund_id = repo.insert_fund(organization_id, "General").await.unwrap();
        let source_id = repo
            .insert_source(&NewSource {
                customer_id,
                organization_id,
                processor_token: "tok-card".to_string(),
                rail: Rail::Card,
                last_four: "4242".to_string(),
                holder_name: "Ada".to_string(),
                is_default: true,
            })
            .await
            .unwrap();

        let fees = FeeSchedule::new(
            Decimal::from_str("0.023").unwrap(),
            Money::from_str_canonical("0.30").unwrap(),
        );
        let audit = AuditLogger::spawn(repo.clone());
        let writer = Arc::new(LedgerWriter::new(
            repo.clone(),
            gateway.clone(),
            fees,
            audit.clone(),
        ));
        let service = SubscriptionService::new(repo.clone(), writer, audit);

        Harness {
            service,
            repo,
            gateway,
            request: NewSubscriptionRequest {
                organization_id,
                customer_id,
                source_id,
                fund_id,
                amount: Money::from_str_canonical("25").unwrap(),
                frequency: Frequency::Monthly,
            },
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn test_create_sets_future_due_date() {
        let h = setup().await;
        let sub = h.service.create(h.request.clone()).await.unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert!(sub.next_payment_on > Utc::now());
        assert_eq!(sub.successful_charges, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_inactive_source() {
        let h = setup().await;
        h.repo.deactivate_source(h.request.source_id).await.unwrap();

        let err = h.service.create(h.request.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cancel_then_reactivate() {
        let h = setup().await;
        let sub = h.service.create(h.request.clone()).await.unwrap();

        let cancelled = h.service.cancel(sub.id).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        let err = h.service.cancel(sub.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let reactivated = h.service.reactivate(sub.id).await.unwrap();
        assert_eq!(reactivated.status, SubscriptionStatus::Active);
        assert!(reactivated.next_payment_on > Utc::now());
    }

    #[tokio::test]
    async fn test_reactivate_rejects_inactive_source() {
        let h = setup().await;
        let sub = h.service.create(h.request.clone()).await.unwrap();
        h.service.cancel(sub.id).await.unwrap();
        h.repo.deactivate_source(h.request.source_id).await.unwrap();

        let err = h.service.reactivate(sub.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let sub = h.repo.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_charge_due_success_advances_and_counts() {
        let h = setup().await;
        let sub = h.service.create(h.request.clone()).await.unwrap();
        let due_before = sub.next_payment_on;

        let tx = h.service.charge_due(sub.id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Succeeded);
        assert_eq!(tx.gross, h.request.amount);

        let sub = h.repo.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.successful_charges, 1);
        assert_eq!(sub.failed_charges, 0);
        assert!(sub.next_payment_on > due_before);
    }

    #[tokio::test]
    async fn test_charge_due_failure_counts_and_keeps_due_date() {
        let h = setup().await;
        let sub = h.service.create(h.request.clone()).await.unwrap();
        let due_before = sub.next_payment_on;

        h.gateway.set_behavior(MockBehavior::Decline {
            reason_code: "1616".to_string(),
            message: "Payment declined: NSF".to_string(),
        });
        let err = h.service.charge_due(sub.id).await.unwrap_err();
        assert!(matches!(err, AppError::ProcessorDeclined { .. }));

        let sub = h.repo.get_subscription(sub.id).await.unwrap().unwrap();
        assert_eq!(sub.successful_charges, 0);
        assert_eq!(sub.failed_charges, 1);
        assert_eq!(sub.next_payment_on, due_before);
    }

    #[tokio::test]
    async fn test_run_due_continues_past_failures() {
        let h = setup().await;
        let a = h.service.create(h.request.clone()).await.unwrap();
        let b = h.service.create(h.request.clone()).await.unwrap();

        // only subscriptions at or past their due date are swept
        let now = Frequency::Yearly.advance(Utc::now());
        let outcomes = h.service.run_due(now).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
        assert_eq!(
            outcomes.iter().map(|o| o.subscription_id).collect::<Vec<_>>(),
            vec![a.id, b.id]
        );

        // nothing due right after the sweep
        let outcomes = h.service.run_due(Utc::now()).await.unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_run_due_mixed_outcomes() {
        let h = setup().await;
        let a = h.service.create(h.request.clone()).await.unwrap();

        // second subscription on a source that gets deactivated
        let bad_source = h
            .repo
            .insert_source(&NewSource {
                customer_id: h.request.customer_id,
                organization_id: h.request.organization_id,
                processor_token: "tok-bad".to_string(),
                rail: Rail::Card,
                last_four: "0001".to_string(),
                holder_name: "Ada".to_string(),
                is_default: false,
            })
            .await
            .unwrap();
        let b = h
            .service
            .create(NewSubscriptionRequest {
                source_id: bad_source,
                ..h.request.clone()
            })
            .await
            .unwrap();
        h.repo.deactivate_source(bad_source).await.unwrap();

        let now = Frequency::Yearly.advance(Utc::now());
        let outcomes = h.service.run_due(now).await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let ok = outcomes.iter().find(|o| o.subscription_id == a.id).unwrap();
        assert!(ok.result.is_ok());
        let failed = outcomes.iter().find(|o| o.subscription_id == b.id).unwrap();
        assert!(failed.result.is_err());

        let b_row = h.repo.get_subscription(b.id).await.unwrap().unwrap();
        assert_eq!(b_row.failed_charges, 1);
    }
}
