//! Append-only audit event log.
//!
//! Events are enqueued on an unbounded channel and written by a background
//! task, so a slow or failing event insert can never block or fail the
//! money path. Callers enqueue only after their own unit of work commits.

use crate::db::Repository;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod event_type {
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const ACH_PENDING: &str = "ach.pending";
    pub const ACH_SETTLED: &str = "ach.settled";
    pub const ACH_FAILED: &str = "ach.failed";
    pub const REFUND_SUCCEEDED: &str = "refund.succeeded";
    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";
    pub const SUBSCRIPTION_REACTIVATED: &str = "subscription.reactivated";
    pub const SUBSCRIPTION_CHARGED: &str = "subscription.charged";
    pub const SUBSCRIPTION_CHARGE_FAILED: &str = "subscription.charge_failed";
}

/// One audit record headed for the `payment_events` table.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: &'static str,
    pub transaction_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub payload: Value,
}

impl AuditEvent {
    pub fn new(
        event_type: &'static str,
        transaction_id: Option<i64>,
        organization_id: Option<i64>,
        payload: Value,
    ) -> Self {
        AuditEvent {
            id: Uuid::new_v4(),
            event_type,
            transaction_id,
            organization_id,
            payload,
        }
    }
}

/// Handle for emitting audit events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    sender: mpsc::UnboundedSender<AuditEvent>,
}

impl AuditLogger {
    /// Spawn the background writer task and return the logger handle.
    pub fn spawn(repo: Arc<Repository>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<AuditEvent>();

        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let result = repo
                    .insert_event(
                        &event.id.to_string(),
                        event.event_type,
                        event.transaction_id,
                        event.organization_id,
                        &event.payload,
                    )
                    .await;
                match result {
                    Ok(()) => {
                        debug!(event_type = event.event_type, "Audit event recorded")
                    }
                    Err(e) => warn!(
                        event_type = event.event_type,
                        error = %e,
                        "Failed to record audit event"
                    ),
                }
            }
        });

        AuditLogger { sender }
    }

    /// Enqueue an event. Failures are logged and swallowed; audit logging
    /// never propagates errors into the money path.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!(error = %e, "Audit event channel closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::setup_test_db;
    use std::time::Duration;

    #[tokio::test]
    async fn test_events_are_written_in_background() {
        let (repo, _temp) = setup_test_db().await;
        let repo = Arc::new(repo);
        let logger = AuditLogger::spawn(repo.clone());

        logger.emit(AuditEvent::new(
            event_type::PAYMENT_SUCCEEDED,
            Some(1),
            Some(1),
            serde_json::json!({ "gross": "100" }),
        ));
        logger.emit(AuditEvent::new(
            event_type::PAYMENT_FAILED,
            Some(2),
            Some(1),
            serde_json::json!({ "reason": "declined" }),
        ));

        // background task; poll briefly for the inserts to land
        for _ in 0..50 {
            if repo
                .count_events(event_type::PAYMENT_SUCCEEDED)
                .await
                .unwrap()
                == 1
                && repo.count_events(event_type::PAYMENT_FAILED).await.unwrap() == 1
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("audit events were not written");
    }

    #[tokio::test]
    async fn test_emit_never_panics_after_receiver_drop() {
        let (sender, receiver) = mpsc::unbounded_channel::<AuditEvent>();
        drop(receiver);
        let logger = AuditLogger { sender };

        logger.emit(AuditEvent::new(
            event_type::PAYMENT_SUCCEEDED,
            None,
            None,
            serde_json::json!({}),
        ));
    }
}
