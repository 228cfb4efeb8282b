use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error taxonomy.
///
/// Validation and balance errors carry no side effects. A processor
/// decline leaves the transaction `failed` with the reason preserved; a
/// processor outage leaves it `pending` for external reconciliation.
/// `InconsistentLedgerState` indicates a bug, not a user error: the unit
/// of work that detects it is aborted and the failure logged loudly.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Payment processor unavailable: {0}")]
    ProcessorUnavailable(String),
    #[error("Payment declined: {message}")]
    ProcessorDeclined {
        reason_code: Option<String>,
        message: String,
    },
    #[error("Refund amount exceeds remaining refundable balance: {0}")]
    InsufficientRefundableBalance(String),
    #[error("Inconsistent ledger state: {0}")]
    InconsistentLedgerState(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<crate::domain::FeeError> for AppError {
    fn from(err: crate::domain::FeeError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ProcessorUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": "payment could not be processed",
                    "detail": msg,
                    "retryable": true,
                }),
            ),
            AppError::ProcessorDeclined {
                reason_code,
                message,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                json!({
                    "error": message,
                    "reasonCode": reason_code,
                }),
            ),
            AppError::InsufficientRefundableBalance(msg) => {
                (StatusCode::BAD_REQUEST, json!({ "error": msg }))
            }
            AppError::InconsistentLedgerState(msg) => {
                tracing::error!(error = %msg, "ledger invariant violated");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal ledger error" }),
                )
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };

        (status, Json(body)).into_response()
    }
}
