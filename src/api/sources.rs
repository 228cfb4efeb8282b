use super::AppState;
use crate::db::NewSource;
use crate::domain::{PaymentSource, Rail};
use crate::error::AppError;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Payment source DTO. The processor token stays server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub id: i64,
    pub customer_id: i64,
    pub rail: String,
    pub last_four: String,
    pub holder_name: String,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: String,
}

impl From<PaymentSource> for SourceResponse {
    fn from(source: PaymentSource) -> Self {
        SourceResponse {
            id: source.id,
            customer_id: source.customer_id,
            rail: source.rail.as_str().to_string(),
            last_four: source.last_four,
            holder_name: source.holder_name,
            is_active: source.is_active,
            is_default: source.is_default,
            created_at: source.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSourceRequest {
    pub processor_token: String,
    pub rail: String,
    pub last_four: String,
    pub holder_name: String,
    #[serde(default)]
    pub is_default: bool,
}

pub async fn register_source(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
    Json(body): Json<RegisterSourceRequest>,
) -> Result<Json<SourceResponse>, AppError> {
    let customer = state
        .repo
        .get_customer(customer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("customer {}", customer_id)))?;

    let rail = Rail::parse(&body.rail)
        .ok_or_else(|| AppError::Validation(format!("unknown rail: {}", body.rail)))?;

    // the customer's first source becomes the default regardless
    let first = state.repo.list_sources(customer_id).await?.is_empty();

    let id = state
        .repo
        .insert_source(&NewSource {
            customer_id,
            organization_id: customer.organization_id,
            processor_token: body.processor_token,
            rail,
            last_four: body.last_four,
            holder_name: body.holder_name,
            is_default: body.is_default || first,
        })
        .await?;

    let source = state
        .repo
        .get_source(id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("payment source {} vanished", id)))?;
    Ok(Json(source.into()))
}

pub async fn list_sources(
    State(state): State<AppState>,
    Path(customer_id): Path<i64>,
) -> Result<Json<Vec<SourceResponse>>, AppError> {
    if state.repo.get_customer(customer_id).await?.is_none() {
        return Err(AppError::NotFound(format!("customer {}", customer_id)));
    }
    let sources = state.repo.list_sources(customer_id).await?;
    Ok(Json(sources.into_iter().map(Into::into).collect()))
}

pub async fn set_default_source(
    State(state): State<AppState>,
    Path((customer_id, source_id)): Path<(i64, i64)>,
) -> Result<Json<SourceResponse>, AppError> {
    if !state.repo.set_default_source(customer_id, source_id).await? {
        return Err(AppError::Validation(format!(
            "source {} cannot be made the default for customer {}",
            source_id, customer_id
        )));
    }
    let source = state
        .repo
        .get_source(source_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("payment source {} vanished", source_id)))?;
    Ok(Json(source.into()))
}

pub async fn deactivate_source(
    State(state): State<AppState>,
    Path((customer_id, source_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, AppError> {
    let source = state
        .repo
        .get_source(source_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("payment source {}", source_id)))?;
    if source.customer_id != customer_id {
        return Err(AppError::NotFound(format!("payment source {}", source_id)));
    }

    state.repo.deactivate_source(source_id).await?;
    Ok(Json(json!({ "deactivated": true })))
}
