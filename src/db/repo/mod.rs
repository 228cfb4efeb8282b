//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `transactions.rs` - transaction, allocation, and balance operations
//! - `sources.rs` - payment source operations
//! - `subscriptions.rs` - subscription operations
//!
//! Monetary columns are stored as canonical decimal text (SQLite REAL
//! would lose precision); the customer balance accumulator is stored as
//! integer cents so deltas can be applied as atomic SQL increments.

mod sources;
mod subscriptions;
mod transactions;

use crate::domain::Money;
use crate::processor::MerchantCredentials;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

pub use sources::NewSource;
pub use subscriptions::NewSubscription;
pub use transactions::{NewCharge, RefundReservation};

/// A merchant tenant with processor credentials already provisioned.
#[derive(Debug, Clone, PartialEq)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub credentials: MerchantCredentials,
    /// Cached processor location id; resolved lazily on first use.
    pub location_id: Option<String>,
}

/// A paying customer with materialized lifetime totals.
#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub organization_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub balance: CustomerBalance,
}

/// Running lifetime totals for a customer.
///
/// Mutated only via atomic deltas inside ledger units of work; equals the
/// element-wise signed sum over the customer's balance-bearing
/// transactions at all times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CustomerBalance {
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Readiness probe: confirms the pool can serve a query.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Organization operations
    // =========================================================================

    pub async fn insert_organization(
        &self,
        name: &str,
        proc_user_id: &str,
        proc_user_api_key: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO organizations (name, proc_user_id, proc_user_api_key, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(proc_user_id)
        .bind(proc_user_api_key)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_organization(&self, id: i64) -> Result<Option<Organization>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, name, proc_user_id, proc_user_api_key, proc_location_id
            FROM organizations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Organization {
            id: r.get("id"),
            name: r.get("name"),
            credentials: MerchantCredentials {
                user_id: r.get("proc_user_id"),
                user_api_key: r.get("proc_user_api_key"),
            },
            location_id: r.get("proc_location_id"),
        }))
    }

    /// Cache a resolved processor location id on the merchant record.
    ///
    /// Concurrent resolvers may both write; the values are identical so
    /// the duplicate write is harmless.
    pub async fn set_organization_location(
        &self,
        id: i64,
        location_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE organizations SET proc_location_id = ? WHERE id = ?")
            .bind(location_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Customer operations
    // =========================================================================

    pub async fn insert_customer(
        &self,
        organization_id: i64,
        email: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO customers (organization_id, email, first_name, last_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(organization_id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_customer(&self, id: i64) -> Result<Option<Customer>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, email, first_name, last_name,
                   amount_acum_cents, fee_acum_cents, net_acum_cents
            FROM customers
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Customer {
            id: r.get("id"),
            organization_id: r.get("organization_id"),
            email: r.get("email"),
            first_name: r.get("first_name"),
            last_name: r.get("last_name"),
            balance: CustomerBalance {
                gross: Money::from_cents(r.get::<i64, _>("amount_acum_cents")),
                fee: Money::from_cents(r.get::<i64, _>("fee_acum_cents")),
                net: Money::from_cents(r.get::<i64, _>("net_acum_cents")),
            },
        }))
    }

    // =========================================================================
    // Fund operations
    // =========================================================================

    pub async fn insert_fund(&self, organization_id: i64, name: &str) -> Result<i64, sqlx::Error> {
        let result = sqlx::query("INSERT INTO funds (organization_id, name) VALUES (?, ?)")
            .bind(organization_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn fund_belongs_to_organization(
        &self,
        fund_id: i64,
        organization_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM funds WHERE id = ? AND organization_id = ?")
            .bind(fund_id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    // =========================================================================
    // Audit event operations
    // =========================================================================

    /// Insert an audit event row. Callers treat failures as best-effort.
    pub async fn insert_event(
        &self,
        id: &str,
        event_type: &str,
        transaction_id: Option<i64>,
        organization_id: Option<i64>,
        payload: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO payment_events (id, event_type, transaction_id, organization_id, payload, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(event_type)
        .bind(transaction_id)
        .bind(organization_id)
        .bind(payload.to_string())
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_events(&self, event_type: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM payment_events WHERE event_type = ?")
            .bind(event_type)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

// =============================================================================
// Row parsing helpers shared by submodules
// =============================================================================

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_money_column(value: &str, column: &str) -> Money {
    Money::from_str(value).unwrap_or_else(|e| {
        warn!(column = %column, value = %value, error = %e, "Failed to parse decimal column, using zero");
        Money::zero()
    })
}

pub(crate) fn parse_timestamp_column(value: &str, column: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!(column = %column, value = %value, error = %e, "Failed to parse timestamp column, using now");
            Utc::now()
        })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::migrations::init_db;
    use tempfile::TempDir;

    pub async fn setup_test_db() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }
}
