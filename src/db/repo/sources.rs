//! Payment source operations.

use super::{now_rfc3339, parse_timestamp_column, Repository};
use crate::domain::{PaymentSource, Rail};
use sqlx::Row;

/// A tokenized payment instrument about to be registered.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub customer_id: i64,
    pub organization_id: i64,
    pub processor_token: String,
    pub rail: Rail,
    pub last_four: String,
    pub holder_name: String,
    pub is_default: bool,
}

impl Repository {
    /// Register a payment source. When the new source is marked default,
    /// the customer's other defaults are cleared in the same unit of work
    /// so at most one default exists at any point.
    pub async fn insert_source(&self, source: &NewSource) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        if source.is_default {
            sqlx::query("UPDATE payment_sources SET is_default = 0 WHERE customer_id = ?")
                .bind(source.customer_id)
                .execute(&mut *tx)
                .await?;
        }

        let result = sqlx::query(
            r#"
            INSERT INTO payment_sources
                (customer_id, organization_id, processor_token, rail, last_four,
                 holder_name, is_active, is_default, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(source.customer_id)
        .bind(source.organization_id)
        .bind(&source.processor_token)
        .bind(source.rail.as_str())
        .bind(&source.last_four)
        .bind(&source.holder_name)
        .bind(source.is_default as i64)
        .bind(now_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<PaymentSource>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, organization_id, processor_token, rail, last_four,
                   holder_name, is_active, is_default, created_at
            FROM payment_sources
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| parse_source_row(&r)))
    }

    pub async fn list_sources(&self, customer_id: i64) -> Result<Vec<PaymentSource>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, organization_id, processor_token, rail, last_four,
                   holder_name, is_active, is_default, created_at
            FROM payment_sources
            WHERE customer_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.iter().map(parse_source_row).collect())
    }

    /// Make one source the customer's default, clearing all others first.
    ///
    /// Returns `false` if the source does not exist, does not belong to the
    /// customer, or is inactive.
    pub async fn set_default_source(
        &self,
        customer_id: i64,
        source_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "SELECT is_active FROM payment_sources WHERE id = ? AND customer_id = ?",
        )
        .bind(source_id)
        .bind(customer_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        if row.get::<i64, _>("is_active") == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE payment_sources SET is_default = 0 WHERE customer_id = ?")
            .bind(customer_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE payment_sources SET is_default = 1 WHERE id = ?")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Deactivate a source. The row is kept so historical transactions can
    /// still reference it. A deactivated default stays default until the
    /// customer picks another; charges against it are rejected upstream.
    pub async fn deactivate_source(&self, source_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE payment_sources SET is_active = 0 WHERE id = ?")
            .bind(source_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_source_row(row: &sqlx::sqlite::SqliteRow) -> PaymentSource {
    let rail_str: String = row.get("rail");
    PaymentSource {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        organization_id: row.get("organization_id"),
        processor_token: row.get("processor_token"),
        rail: Rail::parse(&rail_str).unwrap_or(Rail::Card),
        last_four: row.get("last_four"),
        holder_name: row.get("holder_name"),
        is_active: row.get::<i64, _>("is_active") != 0,
        is_default: row.get::<i64, _>("is_default") != 0,
        created_at: parse_timestamp_column(&row.get::<String, _>("created_at"), "created_at"),
    }
}
