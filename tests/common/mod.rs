//! Shared setup for integration tests: a real SQLite database in a temp
//! directory, a scriptable mock processor, and the full router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use tidepay::api::{create_router, AppState};
use tidepay::db::{init_db, NewSource, Repository};
use tidepay::domain::{FeeSchedule, Money, Rail};
use tidepay::events::AuditLogger;
use tidepay::ledger::{LedgerWriter, SubscriptionService};
use tidepay::processor::MockGateway;

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<Repository>,
    pub gateway: Arc<MockGateway>,
    pub organization_id: i64,
    pub customer_id: i64,
    pub card_source_id: i64,
    pub bank_source_id: i64,
    pub fund_id: i64,
    _temp: TempDir,
}

pub async fn setup_app() -> TestApp {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("test.db").to_string_lossy().to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let gateway = Arc::new(MockGateway::new());

    let organization_id = repo
        .insert_organization("Acme Collective", "merchant-user", "merchant-key")
        .await
        .unwrap();
    let customer_id = repo
        .insert_customer(organization_id, "ada@example.com", "Ada", "Lovelace")
        .await
        .unwrap();
    let fund_id = repo
        .insert_fund(organization_id, "General Fund")
        .await
        .unwrap();
    let card_source_id = repo
        .insert_source(&NewSource {
            customer_id,
            organization_id,
            processor_token: "tok-card".to_string(),
            rail: Rail::Card,
            last_four: "4242".to_string(),
            holder_name: "Ada Lovelace".to_string(),
            is_default: true,
        })
        .await
        .unwrap();
    let bank_source_id = repo
        .insert_source(&NewSource {
            customer_id,
            organization_id,
            processor_token: "tok-bank".to_string(),
            rail: Rail::Bank,
            last_four: "6789".to_string(),
            holder_name: "Ada Lovelace".to_string(),
            is_default: false,
        })
        .await
        .unwrap();

    let fees = FeeSchedule::new(
        "0.023".parse().unwrap(),
        Money::from_str_canonical("0.30").unwrap(),
    );
    let audit = AuditLogger::spawn(repo.clone());
    let writer = Arc::new(LedgerWriter::new(
        repo.clone(),
        gateway.clone(),
        fees,
        audit.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(repo.clone(), writer.clone(), audit));

    let router = create_router(AppState {
        repo: repo.clone(),
        writer,
        subscriptions,
    });

    TestApp {
        router,
        repo,
        gateway,
        organization_id,
        customer_id,
        card_source_id,
        bank_source_id,
        fund_id,
        _temp: temp,
    }
}

impl TestApp {
    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn charge_body(&self, amount: f64, key: &str) -> Value {
        serde_json::json!({
            "organizationId": self.organization_id,
            "customerId": self.customer_id,
            "sourceId": self.card_source_id,
            "amountDollars": amount,
            "fundId": self.fund_id,
            "idempotencyKey": key,
        })
    }
}
