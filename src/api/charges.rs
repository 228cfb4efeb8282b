use super::transactions::TransactionResponse;
use super::AppState;
use crate::domain::Money;
use crate::error::AppError;
use crate::ledger::ChargeRequest;
use crate::processor::IntentionKind;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChargeRequest {
    pub organization_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub amount_dollars: Money,
    pub fund_id: i64,
    pub description: Option<String>,
    pub idempotency_key: String,
}

pub async fn create_charge(
    State(state): State<AppState>,
    Json(body): Json<CreateChargeRequest>,
) -> Result<Json<TransactionResponse>, AppError> {
    let tx = state
        .writer
        .charge(ChargeRequest {
            organization_id: body.organization_id,
            customer_id: body.customer_id,
            source_id: body.source_id,
            amount: body.amount_dollars,
            fund_id: body.fund_id,
            description: body.description,
            idempotency_key: Some(body.idempotency_key),
            subscription_id: None,
        })
        .await?;
    Ok(Json(tx.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentionRequest {
    pub kind: IntentionKindDto,
    pub amount_dollars: Option<Money>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionKindDto {
    Transaction,
    Ticket,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentionResponse {
    pub client_token: String,
}

pub async fn create_intention(
    State(state): State<AppState>,
    Path(organization_id): Path<i64>,
    Json(body): Json<CreateIntentionRequest>,
) -> Result<Json<IntentionResponse>, AppError> {
    let kind = match body.kind {
        IntentionKindDto::Transaction => IntentionKind::Transaction,
        IntentionKindDto::Ticket => IntentionKind::Ticket,
    };
    let client_token = state
        .writer
        .payment_intention(organization_id, kind, body.amount_dollars)
        .await?;
    Ok(Json(IntentionResponse { client_token }))
}
