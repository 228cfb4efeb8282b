//! Transaction, allocation, and balance accumulator operations.

use super::{now_rfc3339, parse_money_column, parse_timestamp_column, CustomerBalance, Repository};
use crate::domain::{
    proportional_refund_fee, FundAllocation, Money, Rail, Transaction, TransactionKind,
    TransactionStatus,
};
use sqlx::{Row, SqliteConnection};
use tracing::warn;

/// A charge about to be inserted in `pending` state.
#[derive(Debug, Clone)]
pub struct NewCharge {
    pub organization_id: i64,
    pub customer_id: Option<i64>,
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
    pub rail: Rail,
    pub description: Option<String>,
    /// SHA-256 of the caller's idempotency key; unique across the ledger.
    pub idempotency_key_hash: Option<String>,
    pub subscription_id: Option<i64>,
}

/// Outcome of attempting to reserve a refund against an original charge.
///
/// A reservation is a `pending` refund row written in the same unit of
/// work that validates the remaining refundable balance, so only one
/// caller at a time can claim a given slice of it.
#[derive(Debug, Clone, PartialEq)]
pub enum RefundReservation {
    /// The refund row is held; amounts are resolved against the remaining
    /// balance when the caller did not name one.
    Reserved {
        refund_id: i64,
        gross: Money,
        fee: Money,
        net: Money,
    },
    /// Settled refunds and open reservations leave too little (or nothing)
    /// for the requested amount.
    Exhausted { remaining: Money },
    /// The original's status does not permit refunds at all.
    NotRefundable(TransactionStatus),
}

/// Signed balance accumulator delta for one customer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BalanceDelta {
    pub customer_id: i64,
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
}

/// Atomic accumulator increment, expressed at the storage layer so
/// concurrent units of work cannot lose updates. Only ever executed
/// inside the unit of work that justifies it.
pub(crate) async fn apply_balance_delta(
    conn: &mut SqliteConnection,
    delta: &BalanceDelta,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE customers
        SET amount_acum_cents = amount_acum_cents + ?,
            fee_acum_cents = fee_acum_cents + ?,
            net_acum_cents = net_acum_cents + ?
        WHERE id = ?
        "#,
    )
    .bind(delta.gross.to_cents())
    .bind(delta.fee.to_cents())
    .bind(delta.net.to_cents())
    .bind(delta.customer_id)
    .execute(conn)
    .await?;
    Ok(())
}

impl Repository {
    /// Find a transaction previously created under the same idempotency key.
    pub async fn find_transaction_by_idempotency_hash(
        &self,
        hash: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query("SELECT id FROM transactions WHERE idempotency_key_hash = ?")
            .bind(hash)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Insert a `pending` transaction and its fund allocations atomically.
    pub async fn insert_pending_charge(
        &self,
        charge: &NewCharge,
        allocations: &[FundAllocation],
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let now = now_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO transactions
                (organization_id, customer_id, gross, fee, net, rail, kind, status,
                 description, idempotency_key_hash, subscription_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'payment', 'pending', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(charge.organization_id)
        .bind(charge.customer_id)
        .bind(charge.gross.to_canonical_string())
        .bind(charge.fee.to_canonical_string())
        .bind(charge.net.to_canonical_string())
        .bind(charge.rail.as_str())
        .bind(charge.description.as_deref())
        .bind(charge.idempotency_key_hash.as_deref())
        .bind(charge.subscription_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let transaction_id = result.last_insert_rowid();

        for allocation in allocations {
            sqlx::query(
                r#"
                INSERT INTO fund_allocations (transaction_id, fund_id, amount, fee, net)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(transaction_id)
            .bind(allocation.fund_id)
            .bind(allocation.amount.to_canonical_string())
            .bind(allocation.fee.to_canonical_string())
            .bind(allocation.net.to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(transaction_id)
    }

    pub async fn get_transaction(&self, id: i64) -> Result<Option<Transaction>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, organization_id, customer_id, gross, fee, net, rail, kind, status,
                   description, external_id, raw_response, refund_of_id, refunded_by_id,
                   created_at, updated_at
            FROM transactions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| parse_transaction_row(&r)))
    }

    pub async fn get_allocations(
        &self,
        transaction_id: i64,
    ) -> Result<Vec<FundAllocation>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT fund_id, amount, fee, net
            FROM fund_allocations
            WHERE transaction_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(transaction_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|r| FundAllocation {
                fund_id: r.get("fund_id"),
                amount: parse_money_column(&r.get::<String, _>("amount"), "amount"),
                fee: parse_money_column(&r.get::<String, _>("fee"), "fee"),
                net: parse_money_column(&r.get::<String, _>("net"), "net"),
            })
            .collect())
    }

    /// Record the processor outcome for a charge in one unit of work:
    /// status transition, external reference, raw response, and (for a
    /// settled charge) the customer balance increment.
    ///
    /// Returns `false` without mutating anything if the stored status does
    /// not permit the transition — the read and write share the unit of
    /// work, so concurrent writers cannot interleave between them.
    pub async fn record_charge_outcome(
        &self,
        transaction_id: i64,
        next_status: TransactionStatus,
        external_id: Option<&str>,
        raw_response: Option<&serde_json::Value>,
        balance_delta: Option<(i64, Money, Money, Money)>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT status FROM transactions WHERE id = ?")
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let current = parse_status(&row.get::<String, _>("status"));
        if !current.can_transition_to(next_status) {
            warn!(
                transaction_id,
                from = %current,
                to = %next_status,
                "rejected illegal status transition"
            );
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = ?,
                external_id = COALESCE(?, external_id),
                raw_response = COALESCE(?, raw_response),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(next_status.as_str())
        .bind(external_id)
        .bind(raw_response.map(|v| v.to_string()))
        .bind(now_rfc3339())
        .bind(transaction_id)
        .execute(&mut *tx)
        .await?;

        if let Some((customer_id, gross, fee, net)) = balance_delta {
            apply_balance_delta(
                &mut tx,
                &BalanceDelta {
                    customer_id,
                    gross,
                    fee,
                    net,
                },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Sum of gross amounts already settled as refunds against an original.
    ///
    /// Iterates in Rust to preserve decimal precision; SQLite's SUM would
    /// coerce the text column to REAL.
    pub async fn sum_refunded_against(&self, original_id: i64) -> Result<Money, sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sum_refund_rows(&mut conn, original_id, false).await
    }

    /// Claim a slice of the original's refundable balance by writing a
    /// `pending` refund row in the same unit of work that validates the
    /// remaining balance. Open reservations count against the balance, so
    /// two callers cannot both claim the same dollars and reach the
    /// processor with them.
    ///
    /// `requested` of `None` claims the full remaining balance. The fee is
    /// the original fee's proportional share, rounded once.
    pub async fn reserve_refund(
        &self,
        original: &Transaction,
        requested: Option<Money>,
    ) -> Result<RefundReservation, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let now = now_rfc3339();

        let row = sqlx::query("SELECT status FROM transactions WHERE id = ?")
            .bind(original.id)
            .fetch_one(&mut *tx)
            .await?;
        let current = parse_status(&row.get::<String, _>("status"));
        if current == TransactionStatus::Refunded {
            return Ok(RefundReservation::Exhausted {
                remaining: Money::zero(),
            });
        }
        if !current.is_refundable() {
            return Ok(RefundReservation::NotRefundable(current));
        }

        let claimed = sum_refund_rows(&mut tx, original.id, true).await?;
        let remaining = original.gross - claimed;
        if !remaining.is_positive() {
            return Ok(RefundReservation::Exhausted { remaining });
        }

        let gross = requested.unwrap_or(remaining);
        if gross > remaining {
            return Ok(RefundReservation::Exhausted { remaining });
        }
        let fee = proportional_refund_fee(original.fee, original.gross, gross);
        let net = gross - fee;

        let result = sqlx::query(
            r#"
            INSERT INTO transactions
                (organization_id, customer_id, gross, fee, net, rail, kind, status,
                 description, refund_of_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'refund', 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(original.organization_id)
        .bind(original.customer_id)
        .bind((-gross).to_canonical_string())
        .bind((-fee).to_canonical_string())
        .bind((-net).to_canonical_string())
        .bind(original.rail.as_str())
        .bind(original.description.as_deref())
        .bind(original.id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RefundReservation::Reserved {
            refund_id: result.last_insert_rowid(),
            gross,
            fee,
            net,
        })
    }

    /// Settle a reserved refund in one unit of work: the refund row flips
    /// to `succeeded` with the processor reference, its mirrored
    /// allocations are written, the original gets its new status and
    /// back-link, and the customer balance is decremented.
    ///
    /// Returns `false` without mutating anything if the reservation is no
    /// longer pending or the original's status no longer permits the
    /// transition.
    pub async fn finalize_refund(
        &self,
        original: &Transaction,
        refund_id: i64,
        external_id: Option<&str>,
        raw_response: &serde_json::Value,
        allocations: &[FundAllocation],
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let now = now_rfc3339();

        let row = sqlx::query("SELECT status, gross, fee, net FROM transactions WHERE id = ?")
            .bind(refund_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };
        if parse_status(&row.get::<String, _>("status")) != TransactionStatus::Pending {
            warn!(refund_id, "refund reservation is no longer pending");
            return Ok(false);
        }
        // stored negative, restore the positive magnitudes
        let gross = parse_money_column(&row.get::<String, _>("gross"), "gross").abs();
        let fee = parse_money_column(&row.get::<String, _>("fee"), "fee").abs();
        let net = parse_money_column(&row.get::<String, _>("net"), "net").abs();

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'succeeded', external_id = ?, raw_response = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(external_id)
        .bind(raw_response.to_string())
        .bind(&now)
        .bind(refund_id)
        .execute(&mut *tx)
        .await?;

        let settled = sum_refund_rows(&mut tx, original.id, false).await?;
        let new_original_status = if settled >= original.gross {
            TransactionStatus::Refunded
        } else {
            TransactionStatus::PartiallyRefunded
        };

        let row = sqlx::query("SELECT status FROM transactions WHERE id = ?")
            .bind(original.id)
            .fetch_one(&mut *tx)
            .await?;
        let current = parse_status(&row.get::<String, _>("status"));
        if !current.can_transition_to(new_original_status) {
            warn!(
                transaction_id = original.id,
                from = %current,
                to = %new_original_status,
                "rejected illegal refund transition"
            );
            return Ok(false);
        }

        for allocation in allocations {
            sqlx::query(
                r#"
                INSERT INTO fund_allocations (transaction_id, fund_id, amount, fee, net)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(refund_id)
            .bind(allocation.fund_id)
            .bind(allocation.amount.to_canonical_string())
            .bind(allocation.fee.to_canonical_string())
            .bind(allocation.net.to_canonical_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE transactions
            SET status = ?, refunded_by_id = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(new_original_status.as_str())
        .bind(refund_id)
        .bind(&now)
        .bind(original.id)
        .execute(&mut *tx)
        .await?;

        if let Some(customer_id) = original.customer_id {
            apply_balance_delta(
                &mut tx,
                &BalanceDelta {
                    customer_id,
                    gross: -gross,
                    fee: -fee,
                    net: -net,
                },
            )
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Release a reservation whose processor refund did not go through.
    /// The row flips to `failed`, which frees the claimed balance.
    pub async fn release_refund(&self, refund_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = 'failed', updated_at = ?
            WHERE id = ? AND kind = 'refund' AND status = 'pending'
            "#,
        )
        .bind(now_rfc3339())
        .bind(refund_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Recompute a customer's balance triple from transaction history.
    ///
    /// Consistency check only: production writes go through atomic deltas.
    /// Must match the stored accumulator exactly.
    pub async fn recompute_customer_balance(
        &self,
        customer_id: i64,
    ) -> Result<CustomerBalance, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT gross, fee, net, status
            FROM transactions
            WHERE customer_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(customer_id)
        .fetch_all(self.pool())
        .await?;

        let mut balance = CustomerBalance::default();
        for row in rows {
            let status = parse_status(&row.get::<String, _>("status"));
            if !status.counts_toward_balance() {
                continue;
            }
            balance.gross = balance.gross + parse_money_column(&row.get::<String, _>("gross"), "gross");
            balance.fee = balance.fee + parse_money_column(&row.get::<String, _>("fee"), "fee");
            balance.net = balance.net + parse_money_column(&row.get::<String, _>("net"), "net");
        }
        Ok(balance)
    }
}

/// Sum the absolute gross of refund rows against an original, settled
/// only or including open reservations. Iterates in Rust to preserve
/// decimal precision; SQLite's SUM would coerce the text column to REAL.
async fn sum_refund_rows(
    conn: &mut SqliteConnection,
    original_id: i64,
    include_pending: bool,
) -> Result<Money, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT gross, status
        FROM transactions
        WHERE refund_of_id = ? AND kind = 'refund'
        ORDER BY id ASC
        "#,
    )
    .bind(original_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut total = Money::zero();
    for row in rows {
        let status = parse_status(&row.get::<String, _>("status"));
        let counted = status == TransactionStatus::Succeeded
            || (include_pending && status == TransactionStatus::Pending);
        if !counted {
            continue;
        }
        let gross = parse_money_column(&row.get::<String, _>("gross"), "gross");
        total = total + gross.abs();
    }
    Ok(total)
}

fn parse_status(value: &str) -> TransactionStatus {
    TransactionStatus::parse(value).unwrap_or_else(|| {
        warn!(value = %value, "Unknown transaction status in database, treating as failed");
        TransactionStatus::Failed
    })
}

fn parse_transaction_row(row: &sqlx::sqlite::SqliteRow) -> Transaction {
    let kind_str: String = row.get("kind");
    let rail_str: String = row.get("rail");
    let raw: Option<String> = row.get("raw_response");

    Transaction {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        customer_id: row.get("customer_id"),
        gross: parse_money_column(&row.get::<String, _>("gross"), "gross"),
        fee: parse_money_column(&row.get::<String, _>("fee"), "fee"),
        net: parse_money_column(&row.get::<String, _>("net"), "net"),
        rail: Rail::parse(&rail_str).unwrap_or(Rail::Card),
        kind: TransactionKind::parse(&kind_str).unwrap_or(TransactionKind::Payment),
        status: parse_status(&row.get::<String, _>("status")),
        description: row.get("description"),
        external_id: row.get("external_id"),
        raw_response: raw.and_then(|s| serde_json::from_str(&s).ok()),
        refund_of_id: row.get("refund_of_id"),
        refunded_by_id: row.get("refunded_by_id"),
        created_at: parse_timestamp_column(&row.get::<String, _>("created_at"), "created_at"),
        updated_at: parse_timestamp_column(&row.get::<String, _>("updated_at"), "updated_at"),
    }
}
