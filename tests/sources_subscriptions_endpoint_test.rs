mod common;

use axum::http::StatusCode;
use common::setup_app;
use serde_json::json;

fn source_body(token: &str, is_default: bool) -> serde_json::Value {
    json!({
        "processorToken": token,
        "rail": "card",
        "lastFour": "1111",
        "holderName": "Grace Hopper",
        "isDefault": is_default,
    })
}

#[tokio::test]
async fn test_register_and_list_sources_one_default() {
    let app = setup_app().await;
    let base = format!("/v1/customers/{}/sources", app.customer_id);

    let (status, created) = app.post(&base, source_body("tok-new", true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["isDefault"], true);
    // tokens never leave the server
    assert!(created.get("processorToken").is_none());

    let (status, listed) = app.get(&base).await;
    assert_eq!(status, StatusCode::OK);
    let sources = listed.as_array().unwrap();
    assert_eq!(sources.len(), 3);
    let defaults: Vec<_> = sources
        .iter()
        .filter(|s| s["isDefault"] == true)
        .collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0]["id"], created["id"]);
}

#[tokio::test]
async fn test_first_source_becomes_default() {
    let app = setup_app().await;
    let other = app
        .repo
        .insert_customer(app.organization_id, "grace@example.com", "Grace", "Hopper")
        .await
        .unwrap();
    let base = format!("/v1/customers/{}/sources", other);

    let (_, created) = app.post(&base, source_body("tok-first", false)).await;
    assert_eq!(created["isDefault"], true);
}

#[tokio::test]
async fn test_set_default_and_deactivate() {
    let app = setup_app().await;
    let base = format!("/v1/customers/{}/sources", app.customer_id);

    let (status, updated) = app
        .post(&format!("{}/{}/default", base, app.bank_source_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["isDefault"], true);

    let (_, listed) = app.get(&base).await;
    let defaults = listed
        .as_array()
        .unwrap()
        .iter()
        .filter(|s| s["isDefault"] == true)
        .count();
    assert_eq!(defaults, 1);

    let (status, body) = app
        .delete(&format!("{}/{}", base, app.card_source_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deactivated"], true);

    // a deactivated source cannot become the default
    let (status, _) = app
        .post(&format!("{}/{}/default", base, app.card_source_id), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // and cannot be charged
    let (status, _) = app.post("/v1/charges", app.charge_body(10.0, "key-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

fn subscription_body(app: &common::TestApp, frequency: &str) -> serde_json::Value {
    json!({
        "organizationId": app.organization_id,
        "customerId": app.customer_id,
        "sourceId": app.card_source_id,
        "fundId": app.fund_id,
        "amountDollars": 25.0,
        "frequency": frequency,
    })
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let app = setup_app().await;

    let (status, sub) = app
        .post("/v1/subscriptions", subscription_body(&app, "monthly"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sub["status"], "active");
    assert_eq!(sub["amount"], 25.0);
    let id = sub["id"].as_i64().unwrap();

    let (status, cancelled) = app
        .post(&format!("/v1/subscriptions/{}/cancel", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert!(cancelled["cancelledAt"].is_string());

    let (status, reactivated) = app
        .post(&format!("/v1/subscriptions/{}/reactivate", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reactivated["status"], "active");
    assert!(reactivated["cancelledAt"].is_null());
}

#[tokio::test]
async fn test_reactivate_with_inactive_source_rejected() {
    let app = setup_app().await;

    let (_, sub) = app
        .post("/v1/subscriptions", subscription_body(&app, "monthly"))
        .await;
    let id = sub["id"].as_i64().unwrap();
    app.post(&format!("/v1/subscriptions/{}/cancel", id), json!({}))
        .await;
    app.repo.deactivate_source(app.card_source_id).await.unwrap();

    let (status, body) = app
        .post(&format!("/v1/subscriptions/{}/reactivate", id), json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("source"));

    let sub = app.repo.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.status.as_str(), "cancelled");
}

#[tokio::test]
async fn test_unknown_frequency_rejected() {
    let app = setup_app().await;
    let (status, _) = app
        .post("/v1/subscriptions", subscription_body(&app, "biweekly"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_run_due_sweeps_due_subscriptions() {
    let app = setup_app().await;

    let (_, sub) = app
        .post("/v1/subscriptions", subscription_body(&app, "daily"))
        .await;
    let id = sub["id"].as_i64().unwrap();

    // freshly created: due tomorrow, so nothing to sweep yet
    let (status, body) = app.post("/v1/subscriptions/run-due", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 0);

    // pull the due date into the past via cancel + reactivate
    app.repo.cancel_subscription(id).await.unwrap();
    app.repo
        .reactivate_subscription(id, chrono::Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();

    let (status, body) = app.post("/v1/subscriptions/run-due", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 1);
    assert_eq!(body["outcomes"][0]["subscriptionId"], id);
    assert!(body["outcomes"][0]["transactionId"].is_number());
    assert!(body["outcomes"][0]["error"].is_null());

    let sub = app.repo.get_subscription(id).await.unwrap().unwrap();
    assert_eq!(sub.successful_charges, 1);

    // the charge landed in the ledger linked to the subscription
    let tx_id = body["outcomes"][0]["transactionId"].as_i64().unwrap();
    let tx = app.repo.get_transaction(tx_id).await.unwrap().unwrap();
    assert_eq!(tx.status.as_str(), "succeeded");
    assert_eq!(tx.gross.to_cents(), 2500);
}
