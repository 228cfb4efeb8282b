//! Subscription operations.

use super::{now_rfc3339, parse_money_column, parse_timestamp_column, Repository};
use crate::domain::{Frequency, Money, Subscription, SubscriptionStatus};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::warn;

/// A recurring-charge agreement about to be created.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub organization_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub fund_id: i64,
    pub amount: Money,
    pub frequency: Frequency,
    pub next_payment_on: DateTime<Utc>,
}

impl Repository {
    /// Create an active subscription and its template allocation row in
    /// one unit of work. The template records the full amount against the
    /// chosen fund; per-charge allocations are written when charges run.
    pub async fn insert_subscription(&self, sub: &NewSubscription) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (organization_id, customer_id, source_id, fund_id, amount, frequency,
                 status, next_payment_on, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(sub.organization_id)
        .bind(sub.customer_id)
        .bind(sub.source_id)
        .bind(sub.fund_id)
        .bind(sub.amount.to_canonical_string())
        .bind(sub.frequency.as_str())
        .bind(sub.next_payment_on.to_rfc3339())
        .bind(now_rfc3339())
        .execute(&mut *tx)
        .await?;

        let subscription_id = result.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO fund_allocations (subscription_id, fund_id, amount, fee, net)
            VALUES (?, ?, ?, '0', '0')
            "#,
        )
        .bind(subscription_id)
        .bind(sub.fund_id)
        .bind(sub.amount.to_canonical_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(subscription_id)
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, customer_id, source_id, fund_id, amount, frequency,
                   status, next_payment_on, cancelled_at, successful_charges, failed_charges,
                   created_at
            FROM subscriptions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| parse_subscription_row(&r)))
    }

    /// Cancel an active subscription. Returns `false` if it is missing or
    /// already cancelled.
    pub async fn cancel_subscription(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Reactivate a cancelled subscription with a fresh due date. Returns
    /// `false` if it is missing or not cancelled.
    pub async fn reactivate_subscription(
        &self,
        id: i64,
        next_payment_on: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active', cancelled_at = NULL, next_payment_on = ?
            WHERE id = ? AND status = 'cancelled'
            "#,
        )
        .bind(next_payment_on.to_rfc3339())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Active subscriptions whose due date is at or before `now`.
    pub async fn list_due_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, customer_id, source_id, fund_id, amount, frequency,
                   status, next_payment_on, cancelled_at, successful_charges, failed_charges,
                   created_at
            FROM subscriptions
            WHERE status = 'active' AND next_payment_on <= ?
            ORDER BY next_payment_on ASC
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(parse_subscription_row).collect())
    }

    /// Record the outcome of one scheduled charge. A success advances the
    /// due date and the success counter; a failure increments the failure
    /// counter and leaves `next_payment_on` untouched so the scheduler
    /// retries on its next pass.
    pub async fn record_subscription_outcome(
        &self,
        id: i64,
        success: bool,
        next_payment_on: Option<DateTime<Utc>>,
    ) -> Result<(), sqlx::Error> {
        if success {
            sqlx::query(
                r#"
                UPDATE subscriptions
                SET successful_charges = successful_charges + 1,
                    next_payment_on = COALESCE(?, next_payment_on)
                WHERE id = ?
                "#,
            )
            .bind(next_payment_on.map(|d| d.to_rfc3339()))
            .bind(id)
            .execute(self.pool())
            .await?;
        } else {
            sqlx::query("UPDATE subscriptions SET failed_charges = failed_charges + 1 WHERE id = ?")
                .bind(id)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }
}

fn parse_subscription_row(row: &sqlx::sqlite::SqliteRow) -> Subscription {
    let frequency_str: String = row.get("frequency");
    let status_str: String = row.get("status");
    let cancelled_at: Option<String> = row.get("cancelled_at");

    Subscription {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        customer_id: row.get("customer_id"),
        source_id: row.get("source_id"),
        fund_id: row.get("fund_id"),
        amount: parse_money_column(&row.get::<String, _>("amount"), "amount"),
        frequency: Frequency::parse(&frequency_str).unwrap_or_else(|| {
            warn!(value = %frequency_str, "Unknown frequency in database, treating as monthly");
            Frequency::Monthly
        }),
        status: SubscriptionStatus::parse(&status_str).unwrap_or(SubscriptionStatus::Cancelled),
        next_payment_on: parse_timestamp_column(
            &row.get::<String, _>("next_payment_on"),
            "next_payment_on",
        ),
        cancelled_at: cancelled_at.map(|s| parse_timestamp_column(&s, "cancelled_at")),
        successful_charges: row.get("successful_charges"),
        failed_charges: row.get("failed_charges"),
        created_at: parse_timestamp_column(&row.get::<String, _>("created_at"), "created_at"),
    }
}
