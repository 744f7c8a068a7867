mod common;

use chrono::Utc;
use uuid::Uuid;

use settlement_core::domain::{ObservedStatus, PaymentPurpose, TransactionStatus, TransactionType};
use settlement_core::services::charges::{ChargeError, ChargeInput};
use settlement_core::services::transfers::TransferInput;
use settlement_core::services::ApplyOutcome;

use common::{beneficiary, harness};

fn checkout(user_id: Uuid, amount: i64, purpose: PaymentPurpose) -> ChargeInput {
    ChargeInput {
        user_id,
        amount,
        email: " ada@example.com ".to_string(),
        purpose,
        callback_url: Some("https://app.test/return".to_string()),
    }
}

#[tokio::test]
async fn test_initialize_records_pending_card_payment() {
    let h = harness();
    let user = Uuid::new_v4();

    let session = h
        .services
        .charges
        .initialize(checkout(user, 25_000, PaymentPurpose::WalletTopUp), Utc::now())
        .await
        .unwrap();

    let tx = &session.transaction;
    assert_eq!(tx.kind, TransactionType::CardPayment);
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert!(tx.reference.starts_with("CHG"));
    assert_eq!(tx.gateway_ref.as_deref(), Some(format!("GW_{}", tx.reference).as_str()));
    assert_eq!(
        session.authorization_url,
        format!("https://checkout.test/{}", tx.reference)
    );
    assert_eq!(tx.purpose(), Some(&PaymentPurpose::WalletTopUp));
    let stored = h.services.ledger.get(&tx.reference).await.unwrap();
    assert_eq!(stored.id, tx.id);
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(h.available(user).await, 0);
}

#[tokio::test]
async fn test_initialize_rejects_bad_input() {
    let h = harness();
    let user = Uuid::new_v4();

    let mut bad_email = checkout(user, 25_000, PaymentPurpose::WalletTopUp);
    bad_email.email = "not-an-email".to_string();
    let err = h
        .services
        .charges
        .initialize(bad_email, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ChargeError::Validation(_)));

    let err = h
        .services
        .charges
        .initialize(checkout(user, 0, PaymentPurpose::WalletTopUp), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ChargeError::Validation(_)));
}

#[tokio::test]
async fn test_verify_applies_gateway_answer_once() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let session = h
        .services
        .charges
        .initialize(checkout(user, 25_000, PaymentPurpose::WalletTopUp), now)
        .await
        .unwrap();
    let reference = session.transaction.reference;
    h.gateway
        .answer_verify(&reference, ObservedStatus::Success, Some(25_000));

    let first = h.services.charges.verify(&reference, now).await.unwrap();
    assert!(matches!(first, ApplyOutcome::Applied(_)));
    assert_eq!(first.transaction().status, TransactionStatus::Success);
    assert_eq!(h.available(user).await, 25_000);

    let second = h.services.charges.verify(&reference, now).await.unwrap();
    assert!(matches!(second, ApplyOutcome::AlreadyApplied(_)));
    assert_eq!(h.available(user).await, 25_000);
    assert_eq!(h.sink.count("payment_confirmed"), 1);
}

#[tokio::test]
async fn test_verify_failed_charge_credits_nothing() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let session = h
        .services
        .charges
        .initialize(checkout(user, 25_000, PaymentPurpose::WalletTopUp), now)
        .await
        .unwrap();
    let reference = session.transaction.reference;
    h.gateway.answer_verify(&reference, ObservedStatus::Failed, None);

    let outcome = h.services.charges.verify(&reference, now).await.unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Failed);
    assert_eq!(h.available(user).await, 0);
    assert_eq!(h.sink.total(), 0);
}

#[tokio::test]
async fn test_verify_unanswered_charge_stays_pending() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let session = h
        .services
        .charges
        .initialize(checkout(user, 25_000, PaymentPurpose::WalletTopUp), now)
        .await
        .unwrap();
    let reference = session.transaction.reference;

    let err = h.services.charges.verify(&reference, now).await.unwrap_err();
    assert!(matches!(err, ChargeError::Gateway(_)));
    let tx = h.services.ledger.get(&reference).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn test_verify_refuses_other_transaction_kinds() {
    let h = harness();
    let user = Uuid::new_v4();
    h.store.set_available(user, 20_000).await;
    let transfer = h
        .services
        .transfers
        .initiate(
            user,
            &TransferInput {
                amount: 10_000,
                beneficiary: beneficiary(),
                narration: None,
            },
            Utc::now(),
        )
        .await
        .unwrap()
        .transaction;

    let err = h
        .services
        .charges
        .verify(&transfer.reference, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ChargeError::NotFound(_)));
    assert_eq!(h.locked(user).await, 10_150);
}
