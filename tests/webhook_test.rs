use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use tower::ServiceExt;
use uuid::Uuid;

use settlement_core::config::Config;
use settlement_core::create_app;
use settlement_core::domain::{
    BalanceEffect, DepositDetails, PaymentPurpose, Transaction, TransitionSource,
};
use settlement_core::ports::LedgerRepository;
use settlement_core::services::SettlementServices;
use settlement_core::startup::build_runtime;
use settlement_core::webhook::authenticator::{
    sign, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

const SECRET: &str = "whsec_test_0123456789abcdef";
const ADMIN_KEY: &str = "admin-test-key";

async fn app() -> (Router, SettlementServices) {
    let vars: HashMap<&str, &str> = [
        ("STORAGE", "memory"),
        ("WEBHOOK_SECRET", SECRET),
        ("GATEWAY_BASE_URL", "http://127.0.0.1:9"),
        ("GATEWAY_SECRET_KEY", "sk_test"),
        ("ADMIN_API_KEY", ADMIN_KEY),
    ]
    .into_iter()
    .collect();
    let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
    let runtime = build_runtime(&config).await.unwrap();
    let services = runtime.state.services.clone();
    (create_app(runtime.state), services)
}

async fn seed_deposit(services: &SettlementServices, reference: &str, amount: i64) -> Uuid {
    let user = Uuid::new_v4();
    let tx = Transaction::deposit(
        reference.to_string(),
        user,
        amount,
        DepositDetails {
            virtual_account_number: None,
            sender_name: None,
            purpose: PaymentPurpose::WalletTopUp,
        },
    );
    services
        .ledger
        .record(&tx, BalanceEffect::None, TransitionSource::Initiation)
        .await
        .unwrap();
    user
}

fn signed_webhook(body: &Value, nonce: &str, secret: &str) -> Request<Body> {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = sign(secret.as_bytes(), &raw).unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhooks/gateway")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .header(TIMESTAMP_HEADER, Utc::now().timestamp().to_string())
        .header(NONCE_HEADER, nonce)
        .body(Body::from(raw))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_signed_webhook_is_processed() {
    let (app, services) = app().await;
    let user = seed_deposit(&services, "DVA_HOOK_1", 150_000).await;
    let body = json!({
        "event": "deposit.success",
        "data": { "reference": "DVA_HOOK_1", "amount": 150000 }
    });

    let response = app
        .oneshot(signed_webhook(&body, "nonce-1", SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let ack = json_body(response).await;
    assert_eq!(ack["received"], true);
    assert_eq!(ack["processed"], true);

    let balance = services.repositories.ledger.balance(user).await.unwrap();
    assert_eq!(balance.available, 150_000);
}

#[tokio::test]
async fn test_replayed_nonce_is_not_processed() {
    let (app, services) = app().await;
    let user = seed_deposit(&services, "DVA_HOOK_2", 150_000).await;
    let body = json!({
        "event": "deposit.success",
        "data": { "reference": "DVA_HOOK_2", "amount": 150000 }
    });

    let first = app
        .clone()
        .oneshot(signed_webhook(&body, "nonce-2", SECRET))
        .await
        .unwrap();
    assert_eq!(json_body(first).await["processed"], true);

    let replay = app
        .oneshot(signed_webhook(&body, "nonce-2", SECRET))
        .await
        .unwrap();
    assert_eq!(replay.status(), StatusCode::OK);
    assert_eq!(json_body(replay).await["processed"], false);

    let balance = services.repositories.ledger.balance(user).await.unwrap();
    assert_eq!(balance.available, 150_000);
}

#[tokio::test]
async fn test_bad_signature_is_acknowledged_but_ignored() {
    let (app, services) = app().await;
    let user = seed_deposit(&services, "DVA_HOOK_3", 150_000).await;
    let body = json!({
        "event": "deposit.success",
        "data": { "reference": "DVA_HOOK_3", "amount": 150000 }
    });

    let response = app
        .oneshot(signed_webhook(&body, "nonce-3", "not-the-secret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["processed"], false);

    let tx = services.ledger.get("DVA_HOOK_3").await.unwrap();
    assert!(tx.status.is_open());
    let balance = services.repositories.ledger.balance(user).await.unwrap();
    assert_eq!(balance.available, 0);
}

#[tokio::test]
async fn test_unknown_reference_is_acknowledged() {
    let (app, _) = app().await;
    let body = json!({
        "event": "transfer.success",
        "data": { "reference": "TRF_UNKNOWN", "amount": 10000 }
    });

    let response = app
        .oneshot(signed_webhook(&body, "nonce-4", SECRET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["processed"], false);
}

#[tokio::test]
async fn test_missing_headers_are_rejected_quietly() {
    let (app, _) = app().await;
    let request = Request::builder()
        .method("POST")
        .uri("/webhooks/gateway")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["processed"], false);
}

#[tokio::test]
async fn test_health_reports_status() {
    let (app, _) = app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["status"].is_string());
}

#[tokio::test]
async fn test_transaction_lookup_returns_audit_trail() {
    let (app, services) = app().await;
    seed_deposit(&services, "DVA_VIEW", 5_000).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/transactions/DVA_VIEW")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["transaction"]["reference"], "DVA_VIEW");
    assert_eq!(body["auditTrail"].as_array().unwrap().len(), 1);

    let missing = app
        .oneshot(
            Request::builder()
                .uri("/transactions/DVA_MISSING")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_require_key() {
    let (app, _) = app().await;

    let anonymous = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/admin/conflicts")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let authorized = app
        .oneshot(
            Request::builder()
                .uri("/admin/conflicts")
                .header("authorization", format!("Bearer {ADMIN_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(authorized.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_statement_upload_returns_report() {
    let (app, _) = app().await;
    let body = json!({
        "entries": [{
            "accountNumber": "0123456789",
            "amount": 10000,
            "name": "Ada Obi",
            "date": "2024-03-01"
        }]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/reconciliation/statement")
                .header("authorization", format!("Bearer {ADMIN_KEY}"))
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["examined"], 0);
    assert_eq!(report["matched"], 0);
}
