use super::AppState;
use crate::domain::{Frequency, Money, Subscription};
use crate::error::AppError;
use crate::ledger::NewSubscriptionRequest;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: i64,
    pub organization_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub fund_id: i64,
    pub amount: Money,
    pub frequency: String,
    pub status: String,
    pub next_payment_on: String,
    pub cancelled_at: Option<String>,
    pub successful_charges: i64,
    pub failed_charges: i64,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        SubscriptionResponse {
            id: sub.id,
            organization_id: sub.organization_id,
            customer_id: sub.customer_id,
            source_id: sub.source_id,
            fund_id: sub.fund_id,
            amount: sub.amount,
            frequency: sub.frequency.as_str().to_string(),
            status: sub.status.as_str().to_string(),
            next_payment_on: sub.next_payment_on.to_rfc3339(),
            cancelled_at: sub.cancelled_at.map(|d| d.to_rfc3339()),
            successful_charges: sub.successful_charges,
            failed_charges: sub.failed_charges,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub organization_id: i64,
    pub customer_id: i64,
    pub source_id: i64,
    pub fund_id: i64,
    pub amount_dollars: Money,
    pub frequency: String,
}

pub async fn create_subscription(
    State(state): State<AppState>,
    Json(body): Json<CreateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let frequency = Frequency::parse(&body.frequency)
        .ok_or_else(|| AppError::Validation(format!("unknown frequency: {}", body.frequency)))?;

    let sub = state
        .subscriptions
        .create(NewSubscriptionRequest {
            organization_id: body.organization_id,
            customer_id: body.customer_id,
            source_id: body.source_id,
            fund_id: body.fund_id,
            amount: body.amount_dollars,
            frequency,
        })
        .await?;
    Ok(Json(sub.into()))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let sub = state.subscriptions.cancel(id).await?;
    Ok(Json(sub.into()))
}

pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let sub = state.subscriptions.reactivate(id).await?;
    Ok(Json(sub.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDueOutcome {
    pub subscription_id: i64,
    pub transaction_id: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDueResponse {
    pub processed: usize,
    pub outcomes: Vec<RunDueOutcome>,
}

pub async fn run_due_subscriptions(
    State(state): State<AppState>,
) -> Result<Json<RunDueResponse>, AppError> {
    let outcomes = state.subscriptions.run_due(Utc::now()).await?;
    let outcomes: Vec<RunDueOutcome> = outcomes
        .into_iter()
        .map(|o| match o.result {
            Ok(transaction_id) => RunDueOutcome {
                subscription_id: o.subscription_id,
                transaction_id: Some(transaction_id),
                error: None,
            },
            Err(error) => RunDueOutcome {
                subscription_id: o.subscription_id,
                transaction_id: None,
                error: Some(error),
            },
        })
        .collect();
    Ok(Json(RunDueResponse {
        processed: outcomes.len(),
        outcomes,
    }))
}
