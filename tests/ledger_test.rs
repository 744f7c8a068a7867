mod common;

use chrono::{Duration, Utc};
use futures::future::join_all;
use uuid::Uuid;

use settlement_core::domain::{
    EntitlementJobStatus, ObservedStatus, PaymentPurpose, TransactionStatus, TransactionType,
    TransitionSource,
};
use settlement_core::services::ledger::RefundRequest;
use settlement_core::services::{ApplyOutcome, LedgerError, NotificationInput};

use common::harness;

fn success(amount: i64) -> NotificationInput {
    NotificationInput::new(ObservedStatus::Success, TransitionSource::Webhook).amount(Some(amount))
}

fn premium() -> PaymentPurpose {
    PaymentPurpose::PremiumUpgrade {
        solution_id: "sol-9".to_string(),
    }
}

fn refund_of(payment_id: Uuid, amount: Option<i64>) -> RefundRequest {
    RefundRequest {
        payment_id,
        amount,
        reason: "customer request".to_string(),
    }
}

#[tokio::test]
async fn test_duplicate_success_credits_once() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_DUP", user, 150_000, now).await;

    let first = h
        .services
        .ledger
        .apply_notification("DVA_DUP", &success(150_000), now)
        .await
        .unwrap();
    assert!(matches!(first, ApplyOutcome::Applied(_)));

    for _ in 0..3 {
        let again = h
            .services
            .ledger
            .apply_notification("DVA_DUP", &success(150_000), now)
            .await
            .unwrap();
        assert!(matches!(again, ApplyOutcome::AlreadyApplied(_)));
    }

    assert_eq!(h.available(user).await, 150_000);
    assert_eq!(h.sink.count("payment_confirmed"), 1);
}

#[tokio::test]
async fn test_concurrent_notifications_apply_once() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_RACE", user, 150_000, now).await;

    let input = success(150_000);
    let ledger = &h.services.ledger;
    let results = join_all((0..50).map(|_| ledger.apply_notification("DVA_RACE", &input, now))).await;

    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(ApplyOutcome::Applied(_))))
        .count();
    assert_eq!(applied, 1);
    assert!(results.iter().all(|r| r.is_ok()));

    let (tx, trail) = h.services.ledger.history("DVA_RACE").await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Success);
    let successes = trail
        .iter()
        .filter(|entry| entry.to_status == TransactionStatus::Success)
        .count();
    assert_eq!(successes, 1);
    assert_eq!(h.available(user).await, 150_000);
}

#[tokio::test]
async fn test_terminal_status_is_not_overwritten() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_TERM", user, 150_000, now).await;
    h.services
        .ledger
        .apply_notification("DVA_TERM", &success(150_000), now)
        .await
        .unwrap();

    let failed = NotificationInput::new(ObservedStatus::Failed, TransitionSource::Webhook);
    let outcome = h
        .services
        .ledger
        .apply_notification("DVA_TERM", &failed, now)
        .await
        .unwrap();
    assert!(matches!(outcome, ApplyOutcome::ConflictRecorded(_)));
    assert_eq!(outcome.transaction().status, TransactionStatus::Success);

    // The same contradiction again does not open a second conflict.
    h.services
        .ledger
        .apply_notification("DVA_TERM", &failed, now)
        .await
        .unwrap();
    let conflicts = h.services.ledger.open_conflicts(10).await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].reference, "DVA_TERM");
    assert_eq!(h.available(user).await, 150_000);
}

#[tokio::test]
async fn test_amount_outside_tolerance_parks_in_mismatch() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_SHORT", user, 150_000, now).await;

    let outcome = h
        .services
        .ledger
        .apply_notification("DVA_SHORT", &success(140_000), now)
        .await
        .unwrap();
    let tx = outcome.into_transaction();
    assert_eq!(tx.status, TransactionStatus::Mismatch);
    assert_eq!(tx.received_amount, Some(140_000));
    assert_eq!(h.available(user).await, 0);
    assert_eq!(h.sink.total(), 0);

    let reviewed = h
        .services
        .ledger
        .review_mismatch("DVA_SHORT", true, Some("customer confirmed".to_string()), now)
        .await
        .unwrap();
    assert_eq!(reviewed.transaction().status, TransactionStatus::Success);
    assert_eq!(h.available(user).await, 140_000);
    assert_eq!(h.sink.count("payment_confirmed"), 1);
}

#[tokio::test]
async fn test_extreme_reported_amount_parks_in_mismatch() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_HUGE", user, 150_000, now).await;

    let outcome = h
        .services
        .ledger
        .apply_notification("DVA_HUGE", &success(i64::MIN), now)
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Mismatch);
    assert_eq!(h.available(user).await, 0);
}

#[tokio::test]
async fn test_amount_within_tolerance_succeeds() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_CLOSE", user, 150_000, now).await;

    let outcome = h
        .services
        .ledger
        .apply_notification("DVA_CLOSE", &success(149_950), now)
        .await
        .unwrap();
    assert_eq!(outcome.transaction().status, TransactionStatus::Success);
    assert_eq!(h.available(user).await, 149_950);
}

#[tokio::test]
async fn test_non_wallet_payment_emits_event_without_credit() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let purpose = PaymentPurpose::JobPosting {
        job_id: "job-42".to_string(),
        slots: 3,
    };
    h.seed_payment("DVA_JOB", user, 50_000, purpose, now).await;

    h.services
        .ledger
        .apply_notification("DVA_JOB", &success(50_000), now)
        .await
        .unwrap();

    // Deposits always land in the wallet; the event still carries the purpose.
    assert_eq!(h.sink.count("payment_confirmed"), 1);
    assert_eq!(h.available(user).await, 50_000);
}

#[tokio::test]
async fn test_unknown_reference_is_an_error() {
    let h = harness();
    let result = h
        .services
        .ledger
        .apply_notification("DVA_NOPE", &success(1_000), Utc::now())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_failed_delivery_is_retried_from_outbox() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_OUTBOX", user, 150_000, now).await;

    h.sink.set_failing(true);
    h.services
        .ledger
        .apply_notification("DVA_OUTBOX", &success(150_000), now)
        .await
        .unwrap();
    assert_eq!(h.sink.total(), 0);

    let jobs = h
        .services
        .entitlements
        .jobs_for_reference("DVA_OUTBOX")
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, EntitlementJobStatus::Pending);

    h.sink.set_failing(false);
    let report = h
        .services
        .entitlements
        .dispatch_due(now + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(h.sink.count("payment_confirmed"), 1);
    assert_eq!(h.sink.keys(), vec![jobs[0].id.to_string()]);

    let jobs = h
        .services
        .entitlements
        .jobs_for_reference("DVA_OUTBOX")
        .await
        .unwrap();
    assert_eq!(jobs[0].status, EntitlementJobStatus::Delivered);
}

#[tokio::test]
async fn test_partial_then_full_refund() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let payment = h.settled_charge(user, 50_000, premium(), now).await;
    assert_eq!(payment.status, TransactionStatus::Success);
    assert_eq!(h.available(user).await, 0);

    let partial = h
        .services
        .ledger
        .refund(&refund_of(payment.id, Some(20_000)), now)
        .await
        .unwrap();
    assert_eq!(partial.payment.status, TransactionStatus::PartiallyRefunded);
    assert_eq!(partial.payment.refunded_amount, 20_000);
    assert_eq!(partial.refund.kind, TransactionType::Refund);
    assert_eq!(partial.refund.amount, 20_000);
    assert_eq!(h.available(user).await, 20_000);

    let err = h
        .services
        .ledger
        .refund(&refund_of(payment.id, Some(40_000)), now)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::RefundExceedsRemaining {
            requested: 40_000,
            remaining: 30_000
        }
    ));
    assert_eq!(h.available(user).await, 20_000);

    let rest = h
        .services
        .ledger
        .refund(&refund_of(payment.id, None), now)
        .await
        .unwrap();
    assert_eq!(rest.payment.status, TransactionStatus::Refunded);
    assert_eq!(rest.refund.amount, 30_000);
    assert_eq!(h.available(user).await, 50_000);
    assert_eq!(h.sink.count("refund_issued"), 2);

    let err = h
        .services
        .ledger
        .refund(&refund_of(payment.id, Some(1)), now)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert_eq!(h.available(user).await, 50_000);
}

#[tokio::test]
async fn test_wallet_funding_is_not_refundable() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let deposit = h.seed_deposit("DVA_REFUND", user, 150_000, now).await;
    h.services
        .ledger
        .apply_notification("DVA_REFUND", &success(150_000), now)
        .await
        .unwrap();
    let topup = h
        .settled_charge(user, 10_000, PaymentPurpose::WalletTopUp, now)
        .await;

    for id in [deposit.id, topup.id] {
        let err = h
            .services
            .ledger
            .refund(&refund_of(id, None), now)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotRefundable(_)));
    }
    assert_eq!(h.available(user).await, 160_000);
}

#[tokio::test]
async fn test_won_dispute_restores_success() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let payment = h.settled_charge(user, 50_000, premium(), now).await;

    let opened = h
        .services
        .ledger
        .open_dispute(&payment.reference, now)
        .await
        .unwrap();
    assert_eq!(opened.transaction().status, TransactionStatus::Disputed);
    let again = h
        .services
        .ledger
        .open_dispute(&payment.reference, now)
        .await
        .unwrap();
    assert!(matches!(again, ApplyOutcome::AlreadyApplied(_)));

    let won = h
        .services
        .ledger
        .resolve_dispute(&payment.reference, true, now)
        .await
        .unwrap();
    assert_eq!(won.transaction().status, TransactionStatus::Success);
    assert_eq!(h.available(user).await, 0);

    let err = h
        .services
        .ledger
        .resolve_dispute(&payment.reference, false, now)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_lost_dispute_claws_back_and_books_chargeback() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_DISPUTE", user, 150_000, now).await;
    h.services
        .ledger
        .apply_notification("DVA_DISPUTE", &success(150_000), now)
        .await
        .unwrap();
    assert_eq!(h.available(user).await, 150_000);

    h.services
        .ledger
        .open_dispute("DVA_DISPUTE", now)
        .await
        .unwrap();
    let lost = h
        .services
        .ledger
        .resolve_dispute("DVA_DISPUTE", false, now)
        .await
        .unwrap();
    let tx = lost.transaction();
    assert_eq!(tx.status, TransactionStatus::Refunded);
    assert_eq!(tx.refunded_amount, 150_000);
    assert_eq!(h.available(user).await, 0);

    let chargebacks: Vec<_> = h
        .services
        .ledger
        .list_by_status(TransactionStatus::Success, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.kind == TransactionType::Chargeback)
        .collect();
    assert_eq!(chargebacks.len(), 1);
    assert_eq!(chargebacks[0].user_id, user);
    assert_eq!(chargebacks[0].amount, 150_000);
}

#[tokio::test]
async fn test_lost_dispute_after_partial_refund_claws_back_refund() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    let payment = h.settled_charge(user, 50_000, premium(), now).await;
    h.services
        .ledger
        .refund(&refund_of(payment.id, Some(20_000)), now)
        .await
        .unwrap();
    assert_eq!(h.available(user).await, 20_000);

    h.services
        .ledger
        .open_dispute(&payment.reference, now)
        .await
        .unwrap();
    let lost = h
        .services
        .ledger
        .resolve_dispute(&payment.reference, false, now)
        .await
        .unwrap();
    assert_eq!(lost.transaction().status, TransactionStatus::Refunded);
    assert_eq!(lost.transaction().refunded_amount, 50_000);
    assert_eq!(h.available(user).await, 0);
}
