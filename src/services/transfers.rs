//! Outbound bank transfers.
//!
//! Funds are locked when the transfer is recorded, before the gateway is called. The lock
//! is captured on success or released on failure; a gateway call with an unknown outcome
//! moves the transfer to processing, where only a webhook or reconciliation settles it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    new_reference, BalanceEffect, Beneficiary, FeeSchedule, ObservedStatus, Transaction,
    TransactionStatus, TransactionType, TransferDetails, TransferLimits, TransitionSource,
};
use crate::gateway::{AccountResolution, GatewayError, PaymentGateway, TransferRequest};
use crate::ports::{LedgerRepository, RepositoryError};
use crate::services::ledger::{LedgerError, NotificationInput, TransactionLedger, TransitionContext};
use crate::validation::{sanitize_string, validate_beneficiary, ValidationError, NARRATION_MAX_LEN};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("amount {amount} is outside the allowed range {min}..={max}")]
    AmountOutOfRange { amount: i64, min: i64, max: i64 },
    #[error("{window} transfer limit exceeded: used {used} of {limit}, requested {requested}")]
    LimitExceeded {
        window: &'static str,
        limit: i64,
        used: i64,
        requested: i64,
    },
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },
    #[error("beneficiary account could not be resolved: {0}")]
    BeneficiaryUnresolved(String),
    #[error("transfer {0} not found")]
    NotFound(String),
    #[error("transfer {reference} is {status} and cannot be {action}")]
    InvalidState {
        reference: String,
        status: TransactionStatus,
        action: &'static str,
    },
    #[error("transfer {0} has reached the retry limit")]
    RetryLimitReached(String),
    #[error("transfer {0} has already been retried")]
    AlreadyRetried(String),
    #[error("batch of {size} exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(LedgerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<LedgerError> for TransferError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance {
                required,
                available,
            } => TransferError::InsufficientBalance {
                required,
                available,
            },
            other => TransferError::Ledger(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferPolicy {
    pub limits: TransferLimits,
    pub fees: FeeSchedule,
    pub batch_max: usize,
    pub max_retries: u32,
    pub batch_size: i64,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            limits: TransferLimits::default(),
            fees: FeeSchedule::default(),
            batch_max: 100,
            max_retries: 3,
            batch_size: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferInput {
    pub amount: i64,
    pub beneficiary: Beneficiary,
    #[serde(default)]
    pub narration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub transaction: Transaction,
    pub fees: i64,
    pub total_amount: i64,
    /// Set when the gateway call failed or its outcome is unknown.
    pub gateway_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Submitted { result: TransferResult },
    Rejected { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTransferResult {
    pub batch_id: Uuid,
    pub items: Vec<BatchItemOutcome>,
}

impl BatchTransferResult {
    pub fn submitted(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, BatchItemOutcome::Submitted { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduledDispatchReport {
    pub due: usize,
    pub dispatched: usize,
    pub errors: Vec<String>,
}

/// Lineage carried by a transfer that is not a first attempt.
#[derive(Debug, Clone, Copy, Default)]
struct Lineage {
    retry_count: u32,
    retry_of: Option<Uuid>,
    batch_id: Option<Uuid>,
}

pub struct TransferEngine {
    ledger: Arc<TransactionLedger>,
    repo: Arc<dyn LedgerRepository>,
    gateway: Arc<dyn PaymentGateway>,
    policy: TransferPolicy,
}

impl TransferEngine {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        repo: Arc<dyn LedgerRepository>,
        gateway: Arc<dyn PaymentGateway>,
        policy: TransferPolicy,
    ) -> Self {
        Self {
            ledger,
            repo,
            gateway,
            policy,
        }
    }

    pub fn fee_for(&self, amount: i64) -> i64 {
        self.policy.fees.fee_for(amount)
    }

    /// Validate, lock funds and submit a transfer to the gateway.
    pub async fn initiate(
        &self,
        user_id: Uuid,
        input: &TransferInput,
        now: DateTime<Utc>,
    ) -> Result<TransferResult, TransferError> {
        let tx = self
            .prepare(user_id, input, Lineage::default(), None, now)
            .await?;
        Ok(self.submit(tx, input.narration.clone(), now).await)
    }

    /// Record a transfer that is submitted later by the scheduler. Funds are locked now.
    pub async fn schedule(
        &self,
        user_id: Uuid,
        input: &TransferInput,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Transaction, TransferError> {
        if due_at <= now {
            return Err(ValidationError::new("due_at", "must be in the future").into());
        }
        self.prepare(user_id, input, Lineage::default(), Some(due_at), now)
            .await
    }

    /// Submit every scheduled transfer whose time has come.
    pub async fn dispatch_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ScheduledDispatchReport, TransferError> {
        let due = self
            .repo
            .find_due_scheduled(now, self.policy.batch_size)
            .await?;
        let mut report = ScheduledDispatchReport {
            due: due.len(),
            ..ScheduledDispatchReport::default()
        };

        for tx in due {
            let ctx = TransitionContext::new(TransitionSource::Scheduler).reason("scheduled time reached");
            match self
                .ledger
                .transition(&tx.reference, TransactionStatus::Pending, ctx, now)
                .await
            {
                Ok(outcome) if outcome.changed() => {
                    let result = self.submit(outcome.into_transaction(), None, now).await;
                    if let Some(error) = result.gateway_error {
                        report.errors.push(format!("{}: {}", tx.reference, error));
                    }
                    report.dispatched += 1;
                }
                // Cancelled or picked up by another worker.
                Ok(_) | Err(LedgerError::InvalidTransition { .. }) => {}
                Err(e) => report.errors.push(format!("{}: {}", tx.reference, e)),
            }
        }
        Ok(report)
    }

    /// Submit a new attempt for a failed transfer. The original stays failed.
    pub async fn retry(
        &self,
        user_id: Uuid,
        transfer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TransferResult, TransferError> {
        let original = self.owned_transfer(user_id, transfer_id).await?;
        if original.status != TransactionStatus::Failed {
            return Err(TransferError::InvalidState {
                reference: original.reference,
                status: original.status,
                action: "retried",
            });
        }
        let details = original
            .transfer_details()
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
        if details.retry_count >= self.policy.max_retries {
            return Err(TransferError::RetryLimitReached(original.reference));
        }
        if self.repo.find_retry_of(original.id).await?.is_some() {
            return Err(TransferError::AlreadyRetried(original.reference));
        }

        let input = TransferInput {
            amount: original.amount,
            beneficiary: details.beneficiary.clone(),
            narration: None,
        };
        let lineage = Lineage {
            retry_count: details.retry_count + 1,
            retry_of: Some(original.id),
            batch_id: details.batch_id,
        };
        let tx = match self.prepare(user_id, &input, lineage, None, now).await {
            Err(TransferError::Ledger(LedgerError::Repository(RepositoryError::Duplicate(_)))) => {
                return Err(TransferError::AlreadyRetried(original.reference))
            }
            other => other?,
        };
        tracing::info!(
            original = %original.reference,
            retry = %tx.reference,
            retry_count = lineage.retry_count,
            "transfer retried"
        );
        Ok(self.submit(tx, None, now).await)
    }

    /// Cancel a transfer that has not reached the gateway's processing stage.
    pub async fn cancel(
        &self,
        user_id: Uuid,
        transfer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Transaction, TransferError> {
        let tx = self.owned_transfer(user_id, transfer_id).await?;
        if !matches!(
            tx.status,
            TransactionStatus::Pending | TransactionStatus::Scheduled
        ) {
            return Err(TransferError::InvalidState {
                reference: tx.reference,
                status: tx.status,
                action: "cancelled",
            });
        }
        let ctx = TransitionContext::new(TransitionSource::User).reason("cancelled by user");
        match self
            .ledger
            .transition(&tx.reference, TransactionStatus::Cancelled, ctx, now)
            .await
        {
            Ok(outcome) => Ok(outcome.into_transaction()),
            Err(LedgerError::InvalidTransition { from, .. }) => Err(TransferError::InvalidState {
                reference: tx.reference,
                status: from,
                action: "cancelled",
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Submit up to `batch_max` transfers. Items are independent; one failing does not stop
    /// the rest.
    pub async fn initiate_batch(
        &self,
        user_id: Uuid,
        inputs: &[TransferInput],
        now: DateTime<Utc>,
    ) -> Result<BatchTransferResult, TransferError> {
        if inputs.is_empty() {
            return Err(ValidationError::new("transfers", "must not be empty").into());
        }
        if inputs.len() > self.policy.batch_max {
            return Err(TransferError::BatchTooLarge {
                size: inputs.len(),
                max: self.policy.batch_max,
            });
        }

        let batch_id = Uuid::new_v4();
        let mut items = Vec::with_capacity(inputs.len());
        for input in inputs {
            let lineage = Lineage {
                batch_id: Some(batch_id),
                ..Lineage::default()
            };
            let outcome = match self.prepare(user_id, input, lineage, None, now).await {
                Ok(tx) => BatchItemOutcome::Submitted {
                    result: self.submit(tx, input.narration.clone(), now).await,
                },
                Err(e) => BatchItemOutcome::Rejected {
                    error: e.to_string(),
                },
            };
            items.push(outcome);
        }

        let result = BatchTransferResult { batch_id, items };
        tracing::info!(
            %batch_id,
            size = inputs.len(),
            submitted = result.submitted(),
            "transfer batch processed"
        );
        Ok(result)
    }

    pub async fn get(&self, user_id: Uuid, transfer_id: Uuid) -> Result<Transaction, TransferError> {
        self.owned_transfer(user_id, transfer_id).await
    }

    async fn owned_transfer(
        &self,
        user_id: Uuid,
        transfer_id: Uuid,
    ) -> Result<Transaction, TransferError> {
        match self.repo.get_by_id(transfer_id).await? {
            Some(tx) if tx.user_id == user_id && tx.kind == TransactionType::Transfer => Ok(tx),
            _ => Err(TransferError::NotFound(transfer_id.to_string())),
        }
    }

    /// Everything up to and including the funds lock. Nothing reaches the gateway's money
    /// movement endpoint from here.
    async fn prepare(
        &self,
        user_id: Uuid,
        input: &TransferInput,
        lineage: Lineage,
        due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Transaction, TransferError> {
        let limits = self.policy.limits;
        if input.amount < limits.min || input.amount > limits.max {
            return Err(TransferError::AmountOutOfRange {
                amount: input.amount,
                min: limits.min,
                max: limits.max,
            });
        }
        self.check_window(user_id, input.amount, "daily", limits.daily, now - Duration::days(1))
            .await?;
        self.check_window(
            user_id,
            input.amount,
            "monthly",
            limits.monthly,
            now - Duration::days(30),
        )
        .await?;

        let beneficiary = validate_beneficiary(&input.beneficiary)?;
        if let Some(narration) = &input.narration {
            crate::validation::validate_max_len("narration", narration, NARRATION_MAX_LEN)?;
        }
        let verified = self.verify_beneficiary(&beneficiary).await?;

        let fees = self.policy.fees.fee_for(input.amount);
        let total_amount = input.amount + fees;
        let mut tx = Transaction::transfer(
            new_reference("TRF"),
            user_id,
            input.amount,
            TransferDetails {
                beneficiary,
                fees,
                total_amount,
                retry_count: lineage.retry_count,
                retry_of: lineage.retry_of,
                batch_id: lineage.batch_id,
                beneficiary_verified: verified,
            },
        )
        .created_at(now);
        if let Some(due_at) = due_at {
            tx = tx.scheduled_for(due_at);
        }

        let recorded = self
            .ledger
            .record(&tx, BalanceEffect::Lock(total_amount), TransitionSource::Initiation)
            .await?;
        Ok(recorded)
    }

    async fn check_window(
        &self,
        user_id: Uuid,
        amount: i64,
        window: &'static str,
        limit: i64,
        since: DateTime<Utc>,
    ) -> Result<(), TransferError> {
        let used = self.repo.sum_transfers(user_id, since).await?;
        if used + amount > limit {
            return Err(TransferError::LimitExceeded {
                window,
                limit,
                used,
                requested: amount,
            });
        }
        Ok(())
    }

    /// True when the bank confirmed the account; unsupported banks pass unverified.
    async fn verify_beneficiary(&self, beneficiary: &Beneficiary) -> Result<bool, TransferError> {
        match self
            .gateway
            .resolve_account(&beneficiary.account_number, &beneficiary.bank_code)
            .await
        {
            Ok(AccountResolution::Resolved { account_name }) => {
                if crate::domain::normalize_name(&account_name) != beneficiary.normalized_name() {
                    tracing::info!(
                        bank_code = %beneficiary.bank_code,
                        "resolved account name differs from the supplied name"
                    );
                }
                Ok(true)
            }
            Ok(AccountResolution::UnsupportedBank) => Ok(false),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    bank_code = %beneficiary.bank_code,
                    "account resolution unavailable, continuing unverified: {}",
                    e
                );
                Ok(false)
            }
            Err(e) => Err(TransferError::BeneficiaryUnresolved(e.message)),
        }
    }

    /// Call the gateway for a recorded transfer and apply what it said.
    async fn submit(
        &self,
        tx: Transaction,
        narration: Option<String>,
        now: DateTime<Utc>,
    ) -> TransferResult {
        let Some(details) = tx.transfer_details().cloned() else {
            return TransferResult {
                fees: 0,
                total_amount: tx.amount,
                transaction: tx,
                gateway_error: Some("transaction has no transfer details".to_string()),
            };
        };
        let (fees, total_amount, beneficiary) =
            (details.fees, details.total_amount, details.beneficiary);
        let request = TransferRequest {
            reference: tx.reference.clone(),
            amount: tx.amount,
            beneficiary,
            narration: narration
                .map(|n| sanitize_string(&n))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("Transfer {}", tx.reference)),
        };

        let (input, gateway_error) = match self.gateway.transfer(&request).await {
            Ok(ack) if matches!(ack.status, ObservedStatus::Failed | ObservedStatus::Reversed) => (
                NotificationInput::new(ObservedStatus::Failed, TransitionSource::Initiation)
                    .gateway_ref(ack.gateway_ref)
                    .reason("declined by gateway"),
                Some("declined by gateway".to_string()),
            ),
            Ok(ack) => (
                NotificationInput::new(ObservedStatus::Processing, TransitionSource::Initiation)
                    .gateway_ref(ack.gateway_ref),
                None,
            ),
            Err(e) if e.is_transient() && !e.is_circuit_open() => {
                // the gateway may have acted; only a re-poll with this reference may fail it
                tracing::warn!(
                    reference = %tx.reference,
                    code = %e.code,
                    "transfer outcome unknown, holding as processing for reconciliation: {}",
                    e.message
                );
                (
                    NotificationInput::new(ObservedStatus::Processing, TransitionSource::Initiation)
                        .reason(format!("outcome unknown: {}", e.code)),
                    Some(e.to_string()),
                )
            }
            Err(e) => (
                NotificationInput::new(ObservedStatus::Failed, TransitionSource::Initiation)
                    .reason(e.message.clone()),
                Some(e.to_string()),
            ),
        };

        let transaction = match self.ledger.apply_notification(&tx.reference, &input, now).await {
            Ok(outcome) => outcome.into_transaction(),
            Err(e) => {
                tracing::error!(
                    reference = %tx.reference,
                    "failed to record gateway answer for transfer: {}",
                    e
                );
                tx
            }
        };

        TransferResult {
            transaction,
            fees,
            total_amount,
            gateway_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_counts_submitted_items() {
        let result = BatchTransferResult {
            batch_id: Uuid::new_v4(),
            items: vec![
                BatchItemOutcome::Rejected {
                    error: "amount".to_string(),
                },
                BatchItemOutcome::Rejected {
                    error: "limit".to_string(),
                },
            ],
        };
        assert_eq!(result.submitted(), 0);
    }

    #[test]
    fn transfer_input_accepts_camel_case() {
        let input: TransferInput = serde_json::from_value(serde_json::json!({
            "amount": 10000,
            "beneficiary": {
                "accountNumber": "0123456789",
                "bankCode": "058",
                "accountName": "Ada Obi"
            }
        }))
        .unwrap();
        assert_eq!(input.amount, 10_000);
        assert_eq!(input.narration, None);
        assert_eq!(input.beneficiary.bank_code, "058");
    }
}
