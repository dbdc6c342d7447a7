use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use bigdecimal::BigDecimal;
use billing_core::db::MemoryStore;
use billing_core::domain::{CreatePaymentIntent, Organization, PaymentIntent};
use billing_core::health::HealthChecker;
use billing_core::ports::CreditLedger;
use billing_core::provider::{PaymentProvider, ProviderError};
use billing_core::{create_app, AppState, BillingServices, ServiceSettings};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

struct OfflineProvider;

#[async_trait]
impl PaymentProvider for OfflineProvider {
    async fn create_payment_intent(
        &self,
        _request: &CreatePaymentIntent,
    ) -> Result<PaymentIntent, ProviderError> {
        Err(ProviderError::CircuitBreakerOpen)
    }
}

async fn app_with_org(balance: i64) -> (axum::Router, Arc<MemoryStore>, Uuid) {
    let store = Arc::new(MemoryStore::new());
    let org = Organization::new("acme", BigDecimal::from(balance));
    let org_id = org.id;
    store.upsert_organization(org).await;

    let state = AppState {
        services: BillingServices::in_memory(
            store.clone(),
            Arc::new(OfflineProvider),
            ServiceSettings::default(),
        ),
        health_checker: Arc::new(HealthChecker::new()),
    };
    (create_app(state), store, org_id)
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn succeeded(id: &str, org_id: Uuid, created_at: i64, amount: &str) -> Value {
    json!({
        "id": id,
        "type": "payment_intent.succeeded",
        "createdAt": created_at,
        "organizationId": org_id,
        "data": {
            "paymentIntentId": format!("pi_{}", id),
            "amount": amount,
        }
    })
}

#[tokio::test]
async fn test_purchase_webhook_credits_once() {
    let (app, store, org_id) = app_with_org(100).await;
    let body = succeeded("evt_http_1", org_id, Utc::now().timestamp(), "50.00");

    let (status, value) = post_json(app.clone(), "/webhooks/payments", body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({ "success": true }));

    let (status, value) = post_json(app, "/webhooks/payments", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({ "success": true }));

    let org = store.get_organization(org_id).await.unwrap().unwrap();
    assert_eq!(org.credit_balance, BigDecimal::from(150));
    assert_eq!(store.list_transactions(org_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stale_webhook_is_bad_request() {
    let (app, store, org_id) = app_with_org(100).await;
    let body = succeeded("evt_http_old", org_id, Utc::now().timestamp() - 900, "50.00");

    let (status, value) = post_json(app, "/webhooks/payments", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(value["success"], json!(false));
    assert!(value["error"].as_str().unwrap().contains("too old"));

    let org = store.get_organization(org_id).await.unwrap().unwrap();
    assert_eq!(org.credit_balance, BigDecimal::from(100));
}

#[tokio::test]
async fn test_settlement_failure_is_server_error() {
    let (app, _, _) = app_with_org(100).await;
    // Organization does not exist, so settlement fails inside the claim.
    let body = succeeded("evt_http_orphan", Uuid::new_v4(), Utc::now().timestamp(), "5");

    let (status, value) = post_json(app, "/webhooks/payments", body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(value["error"].as_str().unwrap().contains("Organization not found"));
}

#[tokio::test]
async fn test_declined_payment_leaves_balance() {
    let (app, store, org_id) = app_with_org(100).await;
    let body = json!({
        "id": "evt_http_declined",
        "type": "payment_intent.payment_failed",
        "createdAt": Utc::now().timestamp(),
        "organizationId": org_id,
        "data": {
            "paymentIntentId": "pi_declined",
            "failureMessage": "card_declined"
        }
    });

    let (status, _) = post_json(app, "/webhooks/payments", body).await;
    assert_eq!(status, StatusCode::OK);

    let org = store.get_organization(org_id).await.unwrap().unwrap();
    assert_eq!(org.credit_balance, BigDecimal::from(100));
    assert!(store.list_transactions(org_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let (app, _, org_id) = app_with_org(0).await;
    let body = json!({
        "id": "evt_http_other",
        "type": "customer.updated",
        "createdAt": Utc::now().timestamp(),
        "organizationId": org_id,
        "data": { "anything": true }
    });

    let (status, value) = post_json(app, "/webhooks/payments", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["success"], json!(true));
}

#[tokio::test]
async fn test_malformed_payload_is_rejected() {
    let (app, _, org_id) = app_with_org(0).await;
    let body = json!({
        "id": "evt_http_bad",
        "type": "payment_intent.succeeded",
        "createdAt": Utc::now().timestamp(),
        "organizationId": org_id,
        "data": { "amount": "10" }
    });

    let (status, value) = post_json(app, "/webhooks/payments", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].as_str().unwrap().contains("Invalid payload"));
}

#[tokio::test]
async fn test_crypto_payment_routes() {
    let (app, store, org_id) = app_with_org(0).await;

    let (status, started) = post_json(
        app.clone(),
        "/crypto-payments",
        json!({
            "organization_id": org_id,
            "user_id": null,
            "amount": "25",
            "wallet_address": "0xabc",
            "network": "base",
            "currency": "USDC"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let payment_id = started["payment_id"].as_str().unwrap().to_string();

    let uri = format!("/crypto-payments/{}/confirm", payment_id);
    let verification = json!({
        "transaction_hash": "0xfeed",
        "confirmations": 3,
        "block_number": 77,
        "amount": "25"
    });
    let (status, value) = post_json(app.clone(), &uri, verification.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({ "applied": true }));

    let (_, value) = post_json(app.clone(), &uri, verification).await;
    assert_eq!(value, json!({ "applied": false }));

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/crypto-payments/{}", payment_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let report: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(report["status"], json!("confirmed"));

    let org = store.get_organization(org_id).await.unwrap().unwrap();
    assert_eq!(org.credit_balance, BigDecimal::from(25));
}

#[tokio::test]
async fn test_unknown_crypto_payment_is_not_found() {
    let (app, _, _) = app_with_org(0).await;
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/crypto-payments/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_and_stats() {
    let (app, _, _) = app_with_org(0).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhooks/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let stats: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stats["total_processed"], json!(0));
}
