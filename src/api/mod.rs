//! HTTP surface: axum routes over the ledger services.
//!
//! Identity is explicit in every request (organization and customer ids);
//! there is no ambient session. DTOs are camelCase at the edge.

use crate::db::Repository;
use crate::ledger::{LedgerWriter, SubscriptionService};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod charges;
mod health;
mod sources;
mod subscriptions;
mod transactions;

pub use transactions::TransactionResponse;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub writer: Arc<LedgerWriter>,
    pub subscriptions: Arc<SubscriptionService>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/charges", post(charges::create_charge))
        .route(
            "/v1/organizations/:id/intentions",
            post(charges::create_intention),
        )
        .route("/v1/transactions/:id", get(transactions::get_transaction))
        .route(
            "/v1/transactions/:id/refund",
            post(transactions::refund_transaction),
        )
        .route(
            "/v1/transactions/:id/settlement",
            post(transactions::settle_transaction),
        )
        .route(
            "/v1/customers/:id/sources",
            post(sources::register_source).get(sources::list_sources),
        )
        .route(
            "/v1/customers/:id/sources/:source_id/default",
            post(sources::set_default_source),
        )
        .route(
            "/v1/customers/:id/sources/:source_id",
            delete(sources::deactivate_source),
        )
        .route("/v1/subscriptions", post(subscriptions::create_subscription))
        .route(
            "/v1/subscriptions/run-due",
            post(subscriptions::run_due_subscriptions),
        )
        .route(
            "/v1/subscriptions/:id/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/v1/subscriptions/:id/reactivate",
            post(subscriptions::reactivate_subscription),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
