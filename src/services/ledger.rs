//! Transaction ledger: the single writer of transaction status and balances.
//!
//! Every status change goes through one compare-and-set on `(status, version)`. A caller that
//! loses the race re-reads and re-plans, so duplicate or concurrent notifications apply their
//! balance effect exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    new_reference, AuditEntry, BalanceEffect, ChargebackDetails, DepositDetails,
    ObservedStatus, RefundDetails, SettlementEvent, StateConflict, Transaction, TransactionDetails,
    TransactionStatus, TransactionType, TransitionSource,
};
use crate::ports::{LedgerRepository, RepositoryError, TransitionCommand};
use crate::services::entitlements::EntitlementDispatcher;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown transaction reference {0}")]
    UnknownReference(String),
    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },
    #[error("refund of {requested} exceeds remaining {remaining}")]
    RefundExceedsRemaining { requested: i64, remaining: i64 },
    #[error("transaction {0} cannot be refunded")]
    NotRefundable(String),
    #[error("transaction {0} kept changing; gave up after repeated conflicts")]
    Contention(String),
    #[error("{reference} is a {kind} and cannot be settled by this notification")]
    KindMismatch {
        reference: String,
        kind: TransactionType,
    },
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for LedgerError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InsufficientBalance {
                required,
                available,
            } => LedgerError::InsufficientBalance {
                required,
                available,
            },
            other => LedgerError::Repository(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerPolicy {
    /// Largest accepted difference, in minor units, between expected and reported amounts.
    pub amount_tolerance: i64,
    pub max_cas_attempts: u32,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            amount_tolerance: 100,
            max_cas_attempts: 8,
        }
    }
}

/// An external observation of a transaction's state, from a webhook, a poll or reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationInput {
    pub status: ObservedStatus,
    pub amount: Option<i64>,
    pub gateway_ref: Option<String>,
    pub sender_name: Option<String>,
    pub reason: Option<String>,
    pub source: TransitionSource,
    /// When set, only transactions of these kinds accept the notification.
    pub kinds: Option<&'static [TransactionType]>,
}

impl NotificationInput {
    pub fn new(status: ObservedStatus, source: TransitionSource) -> Self {
        Self {
            status,
            amount: None,
            gateway_ref: None,
            sender_name: None,
            reason: None,
            source,
            kinds: None,
        }
    }

    pub fn amount(mut self, amount: Option<i64>) -> Self {
        self.amount = amount;
        self
    }

    pub fn gateway_ref(mut self, gateway_ref: Option<String>) -> Self {
        self.gateway_ref = gateway_ref;
        self
    }

    pub fn sender_name(mut self, sender_name: Option<String>) -> Self {
        self.sender_name = sender_name;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn expect_kinds(mut self, kinds: &'static [TransactionType]) -> Self {
        self.kinds = Some(kinds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// This call moved the transaction.
    Applied(Transaction),
    /// The transaction already reflects the observation.
    AlreadyApplied(Transaction),
    /// The observation is behind the stored state.
    Stale(Transaction),
    /// The observation contradicts a closed transaction; kept for manual review.
    ConflictRecorded(Transaction),
}

impl ApplyOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            ApplyOutcome::Applied(tx)
            | ApplyOutcome::AlreadyApplied(tx)
            | ApplyOutcome::Stale(tx)
            | ApplyOutcome::ConflictRecorded(tx) => tx,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        match self {
            ApplyOutcome::Applied(tx)
            | ApplyOutcome::AlreadyApplied(tx)
            | ApplyOutcome::Stale(tx)
            | ApplyOutcome::ConflictRecorded(tx) => tx,
        }
    }

    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied(_) => "applied",
            ApplyOutcome::AlreadyApplied(_) => "already_applied",
            ApplyOutcome::Stale(_) => "stale",
            ApplyOutcome::ConflictRecorded(_) => "conflict_recorded",
        }
    }
}

/// Caller context for a direct status change.
#[derive(Debug, Clone)]
pub struct TransitionContext {
    pub source: TransitionSource,
    pub reason: Option<String>,
    pub gateway_ref: Option<String>,
}

impl TransitionContext {
    pub fn new(source: TransitionSource) -> Self {
        Self {
            source,
            reason: None,
            gateway_ref: None,
        }
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn gateway_ref(mut self, gateway_ref: Option<String>) -> Self {
        self.gateway_ref = gateway_ref;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub payment_id: Uuid,
    /// `None` refunds whatever is left.
    pub amount: Option<i64>,
    pub reason: String,
}

/// Older refund request shapes still sent by existing callers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyRefundRequest {
    #[serde(rename_all = "camelCase")]
    Detailed {
        payment_id: Uuid,
        refund_amount: Option<i64>,
        refund_reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ById { transaction_id: Uuid },
}

impl From<LegacyRefundRequest> for RefundRequest {
    fn from(legacy: LegacyRefundRequest) -> Self {
        match legacy {
            LegacyRefundRequest::Detailed {
                payment_id,
                refund_amount,
                refund_reason,
            } => RefundRequest {
                payment_id,
                amount: refund_amount,
                reason: refund_reason.unwrap_or_else(|| "refund requested".to_string()),
            },
            LegacyRefundRequest::ById { transaction_id } => RefundRequest {
                payment_id: transaction_id,
                amount: None,
                reason: "refund requested".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundOutcome {
    pub payment: Transaction,
    pub refund: Transaction,
}

enum Step {
    Commit(TransitionCommand),
    Done(fn(Transaction) -> ApplyOutcome),
    Conflict(ObservedStatus, String),
}

pub struct TransactionLedger {
    repo: Arc<dyn LedgerRepository>,
    entitlements: Arc<EntitlementDispatcher>,
    policy: LedgerPolicy,
}

impl TransactionLedger {
    pub fn new(
        repo: Arc<dyn LedgerRepository>,
        entitlements: Arc<EntitlementDispatcher>,
        policy: LedgerPolicy,
    ) -> Self {
        Self {
            repo,
            entitlements,
            policy,
        }
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    /// Record a new transaction together with its initial balance effect.
    pub async fn record(
        &self,
        tx: &Transaction,
        effect: BalanceEffect,
        source: TransitionSource,
    ) -> Result<Transaction, LedgerError> {
        let created = self.repo.create(tx, effect, source).await?;
        tracing::info!(
            reference = %created.reference,
            kind = %created.kind,
            status = %created.status,
            amount = created.amount,
            "transaction recorded"
        );
        Ok(created)
    }

    /// Apply an external observation to the transaction named by `reference`.
    pub async fn apply_notification(
        &self,
        reference: &str,
        input: &NotificationInput,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        let tolerance = self.policy.amount_tolerance;
        let entitlements = &self.entitlements;
        self.run(reference, input.source, now, |tx| {
            if input.kinds.is_some_and(|kinds| !kinds.contains(&tx.kind)) {
                return Err(LedgerError::KindMismatch {
                    reference: tx.reference.clone(),
                    kind: tx.kind,
                });
            }
            Ok(plan_notification(tx, input, tolerance, entitlements, now))
        })
        .await
    }

    /// Direct status change with the default balance effect for the move.
    pub async fn transition(
        &self,
        reference: &str,
        to: TransactionStatus,
        ctx: TransitionContext,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        let entitlements = &self.entitlements;
        self.run(reference, ctx.source, now, |tx| {
            if tx.status == to {
                return Ok(Step::Done(ApplyOutcome::AlreadyApplied));
            }
            if !tx.status.can_transition_to(to) {
                return Err(LedgerError::InvalidTransition {
                    from: tx.status,
                    to,
                });
            }
            if tx.status == TransactionStatus::Mismatch && ctx.source != TransitionSource::Manual {
                return Err(LedgerError::InvalidTransition {
                    from: tx.status,
                    to,
                });
            }
            let mut cmd = TransitionCommand::new(tx, to, ctx.source, now)
                .gateway_ref(ctx.gateway_ref.clone());
            match to {
                TransactionStatus::Success => {
                    let received = tx.settled_amount();
                    cmd = cmd
                        .effect(success_effect(tx, received))
                        .received(Some(received))
                        .event(success_event(tx, received).map(|e| entitlements.job_for(e, now)));
                    if let Some(reason) = &ctx.reason {
                        cmd = cmd.reason(reason.clone());
                    }
                }
                TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Expired => {
                    let reason = ctx
                        .reason
                        .clone()
                        .unwrap_or_else(|| to.as_str().to_string());
                    cmd = cmd
                        .effect(release_effect(tx))
                        .failure(reason.clone())
                        .event(failure_event(tx, &reason).map(|e| entitlements.job_for(e, now)));
                }
                _ => {
                    if let Some(reason) = &ctx.reason {
                        cmd = cmd.reason(reason.clone());
                    }
                }
            }
            Ok(Step::Commit(cmd))
        })
        .await
    }

    /// Refund all or part of a settled inbound payment into the user's wallet.
    pub async fn refund(
        &self,
        request: &RefundRequest,
        now: DateTime<Utc>,
    ) -> Result<RefundOutcome, LedgerError> {
        if request.amount.is_some_and(|amount| amount <= 0) {
            return Err(LedgerError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        let payment = self
            .repo
            .get_by_id(request.payment_id)
            .await?
            .ok_or_else(|| LedgerError::UnknownReference(request.payment_id.to_string()))?;
        if payment.kind != TransactionType::CardPayment || credits_wallet(&payment) {
            return Err(LedgerError::NotRefundable(payment.reference));
        }

        let entitlements = &self.entitlements;
        let mut issued: Option<Transaction> = None;
        let outcome = self
            .run(&payment.reference, TransitionSource::Manual, now, |tx| {
                if !matches!(
                    tx.status,
                    TransactionStatus::Success | TransactionStatus::PartiallyRefunded
                ) {
                    return Err(LedgerError::InvalidTransition {
                        from: tx.status,
                        to: TransactionStatus::Refunded,
                    });
                }
                let remaining = tx.refundable_amount();
                let amount = request.amount.unwrap_or(remaining);
                if amount > remaining || amount <= 0 {
                    return Err(LedgerError::RefundExceedsRemaining {
                        requested: amount,
                        remaining,
                    });
                }
                let to = if amount == remaining {
                    TransactionStatus::Refunded
                } else {
                    TransactionStatus::PartiallyRefunded
                };
                let child = Transaction::refund(
                    new_reference("RFD"),
                    tx.user_id,
                    amount,
                    RefundDetails {
                        payment_id: tx.id,
                        payment_reference: tx.reference.clone(),
                        reason: request.reason.clone(),
                    },
                )
                .created_at(now);
                let event = SettlementEvent::RefundIssued {
                    transaction_id: child.id,
                    reference: child.reference.clone(),
                    user_id: tx.user_id,
                    payment_reference: tx.reference.clone(),
                    amount,
                };
                issued = Some(child.clone());
                Ok(Step::Commit(
                    TransitionCommand::new(tx, to, TransitionSource::Manual, now)
                        .effect(BalanceEffect::Credit(amount))
                        .refunded(amount)
                        .reason(request.reason.clone())
                        .child(child)
                        .event(Some(entitlements.job_for(event, now))),
                ))
            })
            .await?;

        let payment = outcome.into_transaction();
        let refund = issued
            .ok_or_else(|| LedgerError::Contention(payment.reference.clone()))?;
        Ok(RefundOutcome { payment, refund })
    }

    pub async fn open_dispute(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        self.run(reference, TransitionSource::Manual, now, |tx| match tx.status {
            TransactionStatus::Disputed => Ok(Step::Done(ApplyOutcome::AlreadyApplied)),
            TransactionStatus::Success | TransactionStatus::PartiallyRefunded
                if !tx.kind.is_outbound() =>
            {
                Ok(Step::Commit(
                    TransitionCommand::new(tx, TransactionStatus::Disputed, TransitionSource::Manual, now)
                        .reason("dispute opened"),
                ))
            }
            from => Err(LedgerError::InvalidTransition {
                from,
                to: TransactionStatus::Disputed,
            }),
        })
        .await
    }

    /// Close a dispute. A lost dispute claws back what the user was given and books a
    /// chargeback against the payment.
    pub async fn resolve_dispute(
        &self,
        reference: &str,
        won: bool,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        self.run(reference, TransitionSource::Manual, now, |tx| {
            if tx.status != TransactionStatus::Disputed {
                return Err(LedgerError::InvalidTransition {
                    from: tx.status,
                    to: if won {
                        TransactionStatus::Success
                    } else {
                        TransactionStatus::Refunded
                    },
                });
            }
            if won {
                let to = if tx.refunded_amount > 0 {
                    TransactionStatus::PartiallyRefunded
                } else {
                    TransactionStatus::Success
                };
                return Ok(Step::Commit(
                    TransitionCommand::new(tx, to, TransitionSource::Manual, now)
                        .reason("dispute won"),
                ));
            }

            let settled = tx.settled_amount();
            let wallet_credit = if credits_wallet(tx) { settled } else { 0 };
            let clawback = wallet_credit + tx.refunded_amount;
            let effect = if clawback > 0 {
                BalanceEffect::Debit(clawback)
            } else {
                BalanceEffect::None
            };
            let child = Transaction::chargeback(
                new_reference("CHB"),
                tx.user_id,
                settled,
                ChargebackDetails {
                    payment_id: tx.id,
                    payment_reference: tx.reference.clone(),
                },
            )
            .created_at(now);
            Ok(Step::Commit(
                TransitionCommand::new(tx, TransactionStatus::Refunded, TransitionSource::Manual, now)
                    .effect(effect)
                    .refunded(settled - tx.refunded_amount)
                    .reason("dispute lost")
                    .child(child),
            ))
        })
        .await
    }

    /// Manual decision on a transaction parked in `mismatch`.
    pub async fn review_mismatch(
        &self,
        reference: &str,
        accept: bool,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        let to = if accept {
            TransactionStatus::Success
        } else {
            TransactionStatus::Failed
        };
        let current = self.get(reference).await?;
        if current.status != TransactionStatus::Mismatch && current.status != to {
            return Err(LedgerError::InvalidTransition {
                from: current.status,
                to,
            });
        }
        let reason = note.unwrap_or_else(|| {
            if accept {
                "mismatch accepted".to_string()
            } else {
                "mismatch rejected".to_string()
            }
        });
        self.transition(
            reference,
            to,
            TransitionContext::new(TransitionSource::Manual).reason(reason),
            now,
        )
        .await
    }

    pub async fn get(&self, reference: &str) -> Result<Transaction, LedgerError> {
        self.repo
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| LedgerError::UnknownReference(reference.to_string()))
    }

    pub async fn find(&self, reference: &str) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.repo.get_by_reference(reference).await?)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.repo.get_by_id(id).await?)
    }

    pub async fn history(
        &self,
        reference: &str,
    ) -> Result<(Transaction, Vec<AuditEntry>), LedgerError> {
        let tx = self.get(reference).await?;
        let trail = self.repo.audit_trail(tx.id).await?;
        Ok((tx, trail))
    }

    pub async fn open_conflicts(&self, limit: i64) -> Result<Vec<StateConflict>, LedgerError> {
        Ok(self.repo.open_conflicts(limit).await?)
    }

    pub async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.repo.list_by_status(status, limit).await?)
    }

    /// Read, plan, compare-and-set; re-plan against fresh state when the compare loses.
    async fn run<F>(
        &self,
        reference: &str,
        source: TransitionSource,
        now: DateTime<Utc>,
        mut plan: F,
    ) -> Result<ApplyOutcome, LedgerError>
    where
        F: FnMut(&Transaction) -> Result<Step, LedgerError> + Send,
    {
        for attempt in 0..self.policy.max_cas_attempts.max(1) {
            let current = self.get(reference).await?;
            match plan(&current)? {
                Step::Done(outcome) => return Ok(outcome(current)),
                Step::Conflict(observed, detail) => {
                    let conflict = StateConflict {
                        id: Uuid::new_v4(),
                        reference: current.reference.clone(),
                        current_status: current.status,
                        observed_status: observed,
                        source,
                        detail,
                        recorded_at: now,
                    };
                    let fresh = self.repo.record_conflict(&conflict).await?;
                    if fresh {
                        tracing::warn!(
                            reference = %current.reference,
                            current = %current.status,
                            observed = %observed,
                            source = %source,
                            "state conflict recorded for review"
                        );
                    }
                    return Ok(ApplyOutcome::ConflictRecorded(current));
                }
                Step::Commit(cmd) => match self.repo.transition(&cmd).await? {
                    Some(next) => {
                        tracing::info!(
                            reference = %next.reference,
                            from = %cmd.expected_status,
                            to = %next.status,
                            source = %cmd.source,
                            effect = ?cmd.effect,
                            "transaction transitioned"
                        );
                        if let Some(job) = &cmd.event {
                            self.entitlements.deliver_now(job).await;
                        }
                        return Ok(ApplyOutcome::Applied(next));
                    }
                    None => {
                        tracing::debug!(reference, attempt, "compare-and-set lost, re-reading");
                    }
                },
            }
        }
        Err(LedgerError::Contention(reference.to_string()))
    }
}

fn plan_notification(
    tx: &Transaction,
    input: &NotificationInput,
    tolerance: i64,
    entitlements: &EntitlementDispatcher,
    now: DateTime<Utc>,
) -> Step {
    use ObservedStatus as O;
    use TransactionStatus as S;

    let job = |event: Option<SettlementEvent>| event.map(|e| entitlements.job_for(e, now));

    match (input.status, tx.status) {
        (_, S::Scheduled) => Step::Done(ApplyOutcome::Stale),

        (O::Pending, _) => Step::Done(ApplyOutcome::Stale),
        (O::Processing, S::Pending) => Step::Commit(
            TransitionCommand::new(tx, S::Processing, input.source, now)
                .gateway_ref(input.gateway_ref.clone())
                .reason(
                    input
                        .reason
                        .clone()
                        .unwrap_or_else(|| "gateway processing".to_string()),
                ),
        ),
        (O::Processing, S::Processing) => Step::Done(ApplyOutcome::AlreadyApplied),
        (O::Processing, _) => Step::Done(ApplyOutcome::Stale),

        (O::Success, S::Pending | S::Processing) => {
            let received = input.amount.unwrap_or(tx.amount);
            let details = with_sender(tx, input.sender_name.as_deref());
            if received.abs_diff(tx.amount) > tolerance.max(0) as u64 {
                let mut cmd = TransitionCommand::new(tx, S::Mismatch, input.source, now)
                    .received(Some(received))
                    .gateway_ref(input.gateway_ref.clone())
                    .reason(format!(
                        "amount mismatch: expected {}, received {}",
                        tx.amount, received
                    ));
                if let Some(details) = details {
                    cmd = cmd.details(details);
                }
                return Step::Commit(cmd);
            }
            let mut cmd = TransitionCommand::new(tx, S::Success, input.source, now)
                .effect(success_effect(tx, received))
                .received(Some(received))
                .gateway_ref(input.gateway_ref.clone())
                .event(job(success_event(tx, received)));
            if let Some(details) = details {
                cmd = cmd.details(details);
            }
            Step::Commit(cmd)
        }
        (O::Success, S::Mismatch) => Step::Done(ApplyOutcome::AlreadyApplied),
        (O::Success, status) if status.is_settled_success() => {
            Step::Done(ApplyOutcome::AlreadyApplied)
        }

        (O::Failed | O::Reversed, S::Pending | S::Processing) => {
            let reason = input.reason.clone().unwrap_or_else(|| {
                if input.status == O::Reversed {
                    "reversed by gateway".to_string()
                } else {
                    "failed at gateway".to_string()
                }
            });
            Step::Commit(
                TransitionCommand::new(tx, S::Failed, input.source, now)
                    .effect(release_effect(tx))
                    .gateway_ref(input.gateway_ref.clone())
                    .failure(reason.clone())
                    .event(job(failure_event(tx, &reason))),
            )
        }
        (O::Failed, status) if status.is_settled_failure() => {
            Step::Done(ApplyOutcome::AlreadyApplied)
        }

        (O::Reversed, S::Success) if tx.kind.is_outbound() => {
            let total = tx.total_amount();
            Step::Commit(
                TransitionCommand::new(tx, S::Refunded, input.source, now)
                    .effect(BalanceEffect::Credit(total))
                    .refunded(tx.amount)
                    .failure("reversed by gateway after completion")
                    .event(job(failure_event(tx, "reversed"))),
            )
        }
        (O::Reversed, S::Refunded | S::Failed) if tx.kind.is_outbound() => {
            Step::Done(ApplyOutcome::AlreadyApplied)
        }

        (observed, current) => Step::Conflict(
            observed,
            format!(
                "{} reported {} but transaction is {}",
                input.source, observed, current
            ),
        ),
    }
}

fn credits_wallet(tx: &Transaction) -> bool {
    match tx.kind {
        TransactionType::Deposit => true,
        TransactionType::CardPayment => tx.purpose().is_some_and(|p| p.credits_wallet()),
        _ => false,
    }
}

fn success_effect(tx: &Transaction, received: i64) -> BalanceEffect {
    if tx.kind.is_outbound() {
        BalanceEffect::Capture(tx.total_amount())
    } else if credits_wallet(tx) {
        BalanceEffect::Credit(received)
    } else {
        BalanceEffect::None
    }
}

fn release_effect(tx: &Transaction) -> BalanceEffect {
    if tx.kind.is_outbound() && (tx.status.is_open() || tx.status == TransactionStatus::Mismatch) {
        BalanceEffect::Release(tx.total_amount())
    } else {
        BalanceEffect::None
    }
}

fn success_event(tx: &Transaction, received: i64) -> Option<SettlementEvent> {
    if tx.kind.is_outbound() {
        Some(SettlementEvent::TransferCompleted {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            user_id: tx.user_id,
            amount: tx.amount,
        })
    } else {
        SettlementEvent::payment_confirmed(tx, received)
    }
}

fn failure_event(tx: &Transaction, reason: &str) -> Option<SettlementEvent> {
    tx.kind.is_outbound().then(|| SettlementEvent::TransferFailed {
        transaction_id: tx.id,
        reference: tx.reference.clone(),
        user_id: tx.user_id,
        reason: reason.to_string(),
    })
}

/// Deposit details with the payer name filled in from the notification.
fn with_sender(tx: &Transaction, sender_name: Option<&str>) -> Option<TransactionDetails> {
    match (&tx.details, sender_name) {
        (TransactionDetails::Deposit(details), Some(name)) if details.sender_name.is_none() => {
            Some(TransactionDetails::Deposit(DepositDetails {
                sender_name: Some(name.to_string()),
                ..details.clone()
            }))
        }
        _ => None,
    }
}
