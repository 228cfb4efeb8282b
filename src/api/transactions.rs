use super::AppState;
use crate::domain::{Money, Transaction};
use crate::error::AppError;
use crate::ledger::AchOutcome;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

/// Transaction receipt DTO. Amounts are decimal dollars; the raw
/// processor response never leaves the ledger.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: i64,
    pub organization_id: i64,
    pub customer_id: Option<i64>,
    pub gross: Money,
    pub fee: Money,
    pub net: Money,
    pub rail: String,
    pub kind: String,
    pub status: String,
    pub description: Option<String>,
    pub external_id: Option<String>,
    pub refund_of_id: Option<i64>,
    pub refunded_by_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        TransactionResponse {
            id: tx.id,
            organization_id: tx.organization_id,
            customer_id: tx.customer_id,
            gross: tx.gross,
            fee: tx.fee,
            net: tx.net,
            rail: tx.rail.as_str().to_string(),
            kind: tx.kind.as_str().to_string(),
            status: tx.status.as_str().to_string(),
            description: tx.description,
            external_id: tx.external_id,
            refund_of_id: tx.refund_of_id,
            refunded_by_id: tx.refunded_by_id,
            created_at: tx.created_at.to_rfc3339(),
            updated_at: tx.updated_at.to_rfc3339(),
        }
    }
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TransactionResponse>, AppError> {
    let tx = state
        .repo
        .get_transaction(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;
    Ok(Json(tx.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    /// Absent means refund the full remaining balance.
    pub amount_dollars: Option<Money>,
}

pub async fn refund_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RefundRequest>,
) -> Result<Json<TransactionResponse>, AppError> {
    let refund = state.writer.refund(id, body.amount_dollars).await?;
    Ok(Json(refund.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub outcome: SettlementOutcome,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementOutcome {
    Settled,
    Failed,
}

pub async fn settle_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SettlementRequest>,
) -> Result<Json<TransactionResponse>, AppError> {
    let outcome = match body.outcome {
        SettlementOutcome::Settled => AchOutcome::Settled,
        SettlementOutcome::Failed => AchOutcome::Failed,
    };
    let tx = state.writer.settle_ach(id, outcome).await?;
    Ok(Json(tx.into()))
}
