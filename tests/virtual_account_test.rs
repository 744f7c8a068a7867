mod common;

use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use settlement_core::domain::{PaymentPurpose, TransactionStatus, VirtualAccountStatus};
use settlement_core::gateway::units::AmountUnit;
use settlement_core::gateway::GatewayError;
use settlement_core::services::virtual_accounts::{CreateDepositRequest, VirtualAccountError};
use settlement_core::services::ApplyOutcome;
use settlement_core::webhook::{AuthenticatedWebhook, EventKind};

use common::harness;

fn request(user_id: Uuid, amount: i64) -> CreateDepositRequest {
    CreateDepositRequest {
        user_id,
        expected_amount: amount,
        duration: Duration::minutes(30),
        customer_name: "Ada Obi".to_string(),
        purpose: PaymentPurpose::WalletTopUp,
    }
}

fn deposit_hook(data: serde_json::Value) -> AuthenticatedWebhook {
    AuthenticatedWebhook {
        event: EventKind::DepositSuccess,
        data: data.as_object().cloned().unwrap(),
        nonce: Uuid::new_v4().to_string(),
    }
}

#[tokio::test]
async fn test_create_issues_account_and_pending_deposit() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();

    let account = h
        .services
        .virtual_accounts
        .create(request(user, 150_000), now)
        .await
        .unwrap();
    assert_eq!(account.status, VirtualAccountStatus::Pending);
    assert_eq!(account.expires_at, now + Duration::minutes(30));
    assert!(account.account_number.starts_with("99"));

    let tx = h.services.ledger.get(&account.reference).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.amount, 150_000);
}

#[tokio::test]
async fn test_deposit_webhook_credits_wallet_and_settles_account() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let account = h
        .services
        .virtual_accounts
        .create(request(user, 150_000), now)
        .await
        .unwrap();

    let hook = deposit_hook(json!({
        "reference": account.reference,
        "amount": 150000,
        "senderName": "ADA OBI",
    }));
    let outcome = h
        .services
        .handle_webhook(&hook, AmountUnit::Minor, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ApplyOutcome::Applied(_)));
    assert_eq!(h.available(user).await, 150_000);

    let account = h
        .services
        .virtual_accounts
        .get(&account.reference, now)
        .await
        .unwrap();
    assert_eq!(account.status, VirtualAccountStatus::Success);
    assert_eq!(account.deposited_amount, Some(150_000));
    assert_eq!(account.sender_name.as_deref(), Some("ADA OBI"));
}

#[tokio::test]
async fn test_deposit_webhook_resolves_by_account_number() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let account = h
        .services
        .virtual_accounts
        .create(request(user, 20_000), now)
        .await
        .unwrap();

    let hook = deposit_hook(json!({
        "accountNumber": account.account_number,
        "amount": 20000,
    }));
    h.services
        .handle_webhook(&hook, AmountUnit::Minor, now)
        .await
        .unwrap();
    assert_eq!(h.available(user).await, 20_000);
}

#[tokio::test]
async fn test_short_deposit_mirrors_mismatch_onto_account() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let account = h
        .services
        .virtual_accounts
        .create(request(user, 150_000), now)
        .await
        .unwrap();

    let hook = deposit_hook(json!({ "reference": account.reference, "amount": 100000 }));
    h.services
        .handle_webhook(&hook, AmountUnit::Minor, now)
        .await
        .unwrap();
    let stored = h
        .services
        .virtual_accounts
        .get(&account.reference, now)
        .await
        .unwrap();
    assert_eq!(stored.status, VirtualAccountStatus::Mismatch);
    assert_eq!(h.available(user).await, 0);

    let reviewed = h
        .services
        .virtual_accounts
        .review_mismatch(&account.reference, false, None, now)
        .await
        .unwrap();
    assert_eq!(reviewed.status, VirtualAccountStatus::Failed);
    assert_eq!(h.available(user).await, 0);
}

#[tokio::test]
async fn test_quota_limits_active_accounts() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    for _ in 0..5 {
        h.services
            .virtual_accounts
            .create(request(user, 10_000), now)
            .await
            .unwrap();
    }

    let err = h
        .services
        .virtual_accounts
        .create(request(user, 10_000), now)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VirtualAccountError::QuotaExceeded { active: 5, limit: 5 }
    ));

    // Another user is unaffected.
    h.services
        .virtual_accounts
        .create(request(Uuid::new_v4(), 10_000), now)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_expired_accounts_free_the_quota() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    for _ in 0..5 {
        h.services
            .virtual_accounts
            .create(request(user, 10_000), now)
            .await
            .unwrap();
    }

    let later = now + Duration::hours(1);
    let report = h.services.virtual_accounts.expire_overdue(later).await.unwrap();
    assert_eq!(report.examined, 5);
    assert_eq!(report.expired, 5);
    assert_eq!(h.services.virtual_accounts.count_active(user, later).await.unwrap(), 0);

    h.services
        .virtual_accounts
        .create(request(user, 10_000), later)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_duration_outside_bounds_is_rejected() {
    let h = harness();
    let mut short = request(Uuid::new_v4(), 10_000);
    short.duration = Duration::minutes(5);
    let err = h
        .services
        .virtual_accounts
        .create(short, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, VirtualAccountError::Validation(_)));
}

#[tokio::test]
async fn test_gateway_failure_creates_nothing() {
    let h = harness();
    let user = Uuid::new_v4();
    h.gateway
        .fail_deposit_accounts(GatewayError::transient("unavailable", "503"));

    let err = h
        .services
        .virtual_accounts
        .create(request(user, 10_000), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, VirtualAccountError::Gateway(_)));
    assert_eq!(
        h.services
            .virtual_accounts
            .count_active(user, Utc::now())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_poll_settles_pending_account() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let account = h
        .services
        .virtual_accounts
        .create(request(user, 30_000), now)
        .await
        .unwrap();
    h.gateway.answer_verify(
        &account.reference,
        settlement_core::domain::ObservedStatus::Success,
        Some(30_000),
    );

    let polled = h
        .services
        .virtual_accounts
        .check_status(&account.reference, now)
        .await
        .unwrap();
    assert_eq!(polled.status, VirtualAccountStatus::Success);
    assert_eq!(h.available(user).await, 30_000);
}
