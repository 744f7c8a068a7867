//! Ephemeral deposit accounts: issue, track, expire.
//!
//! The account row mirrors the ledger transaction under the same reference. The ledger is
//! the source of truth; account status follows it.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    new_reference, BalanceEffect, DepositDetails, PaymentPurpose, Transaction, TransactionStatus,
    TransitionSource, VirtualAccount, VirtualAccountStatus,
};
use crate::gateway::{DepositAccountRequest, GatewayError, PaymentGateway};
use crate::ports::{RepositoryError, VirtualAccountRepository};
use crate::services::ledger::{
    ApplyOutcome, LedgerError, NotificationInput, TransactionLedger, TransitionContext,
};
use crate::validation::{sanitize_string, validate_positive_amount, ValidationError};

#[derive(Debug, Error)]
pub enum VirtualAccountError {
    #[error("user already has {active} active deposit accounts (limit {limit})")]
    QuotaExceeded { active: i64, limit: i64 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("virtual account {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for VirtualAccountError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::QuotaExceeded { active, limit } => {
                VirtualAccountError::QuotaExceeded { active, limit }
            }
            other => VirtualAccountError::Repository(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VirtualAccountPolicy {
    pub max_active: i64,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub batch_size: i64,
}

impl Default for VirtualAccountPolicy {
    fn default() -> Self {
        Self {
            max_active: 5,
            min_duration: Duration::minutes(10),
            max_duration: Duration::hours(24),
            batch_size: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateDepositRequest {
    pub user_id: Uuid,
    pub expected_amount: i64,
    pub duration: Duration,
    pub customer_name: String,
    pub purpose: PaymentPurpose,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExpiryReport {
    pub examined: usize,
    pub expired: usize,
    pub errors: Vec<String>,
}

pub struct VirtualAccountManager {
    accounts: Arc<dyn VirtualAccountRepository>,
    ledger: Arc<TransactionLedger>,
    gateway: Arc<dyn PaymentGateway>,
    policy: VirtualAccountPolicy,
}

impl VirtualAccountManager {
    pub fn new(
        accounts: Arc<dyn VirtualAccountRepository>,
        ledger: Arc<TransactionLedger>,
        gateway: Arc<dyn PaymentGateway>,
        policy: VirtualAccountPolicy,
    ) -> Self {
        Self {
            accounts,
            ledger,
            gateway,
            policy,
        }
    }

    /// Issue a deposit account and the pending ledger deposit behind it.
    pub async fn create(
        &self,
        request: CreateDepositRequest,
        now: DateTime<Utc>,
    ) -> Result<VirtualAccount, VirtualAccountError> {
        validate_positive_amount(request.expected_amount)?;
        if request.duration < self.policy.min_duration || request.duration > self.policy.max_duration
        {
            return Err(ValidationError::new(
                "duration",
                format!(
                    "must be between {} and {} minutes",
                    self.policy.min_duration.num_minutes(),
                    self.policy.max_duration.num_minutes()
                ),
            )
            .into());
        }

        // Cheap early exit; the insert below re-checks atomically.
        let active = self.accounts.count_active(request.user_id, now).await?;
        if active >= self.policy.max_active {
            return Err(VirtualAccountError::QuotaExceeded {
                active,
                limit: self.policy.max_active,
            });
        }

        let reference = new_reference("DVA");
        let expires_at = now + request.duration;
        let issued = self
            .gateway
            .create_deposit_account(&DepositAccountRequest {
                reference: reference.clone(),
                user_id: request.user_id,
                amount: request.expected_amount,
                customer_name: sanitize_string(&request.customer_name),
                expires_at,
            })
            .await?;

        let account = VirtualAccount {
            id: Uuid::new_v4(),
            reference: reference.clone(),
            user_id: request.user_id,
            account_number: issued.account_number.clone(),
            account_name: issued.account_name,
            bank_name: issued.bank_name,
            expected_amount: request.expected_amount,
            deposited_amount: None,
            sender_name: None,
            status: VirtualAccountStatus::Pending,
            expires_at,
            created_at: now,
            updated_at: now,
        };
        let account = self
            .accounts
            .insert_within_quota(&account, self.policy.max_active, now)
            .await?;

        let deposit = Transaction::deposit(
            reference.clone(),
            request.user_id,
            request.expected_amount,
            DepositDetails {
                virtual_account_number: Some(issued.account_number),
                sender_name: None,
                purpose: request.purpose,
            },
        )
        .created_at(now);
        if let Err(e) = self
            .ledger
            .record(&deposit, BalanceEffect::None, TransitionSource::Initiation)
            .await
        {
            tracing::error!(reference = %reference, "deposit record failed, retiring account: {}", e);
            self.accounts
                .update_status(
                    &reference,
                    VirtualAccountStatus::Pending,
                    VirtualAccountStatus::Failed,
                    None,
                    None,
                    now,
                )
                .await?;
            return Err(e.into());
        }

        tracing::info!(
            reference = %account.reference,
            user_id = %account.user_id,
            expected_amount = account.expected_amount,
            %expires_at,
            "virtual account issued"
        );
        Ok(account)
    }

    /// Stored account with lazy expiry applied.
    pub async fn get(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<VirtualAccount, VirtualAccountError> {
        self.accounts
            .get_by_reference(reference)
            .await?
            .map(|account| account.presented(now))
            .ok_or_else(|| VirtualAccountError::NotFound(reference.to_string()))
    }

    pub async fn reference_for_account_number(
        &self,
        account_number: &str,
    ) -> Result<Option<String>, VirtualAccountError> {
        Ok(self
            .accounts
            .get_by_account_number(account_number)
            .await?
            .map(|account| account.reference))
    }

    pub async fn count_active(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<i64, VirtualAccountError> {
        Ok(self.accounts.count_active(user_id, now).await?)
    }

    /// Poll the gateway for a pending account and settle it if the gateway has an answer.
    pub async fn check_status(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<VirtualAccount, VirtualAccountError> {
        let account = self.get(reference, now).await?;
        if account.status != VirtualAccountStatus::Pending {
            return Ok(account);
        }

        let report = self.gateway.verify_deposit(reference).await?;
        if report.status.is_resolved() {
            let input = NotificationInput::new(report.status, TransitionSource::Poll)
                .amount(report.amount)
                .gateway_ref(report.gateway_ref)
                .sender_name(report.sender_name);
            self.handle_notification(reference, &input, now).await?;
        }
        self.get(reference, now).await
    }

    /// Apply a deposit notification to the ledger, then mirror the result onto the account.
    pub async fn handle_notification(
        &self,
        reference: &str,
        input: &NotificationInput,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, VirtualAccountError> {
        let outcome = self.ledger.apply_notification(reference, input, now).await?;
        self.sync_account(outcome.transaction(), input.sender_name.clone(), now)
            .await?;
        Ok(outcome)
    }

    /// Expire pending accounts past their window and the deposits behind them.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<ExpiryReport, VirtualAccountError> {
        let overdue = self
            .accounts
            .find_overdue(now, self.policy.batch_size)
            .await?;
        let mut report = ExpiryReport {
            examined: overdue.len(),
            ..ExpiryReport::default()
        };

        for account in overdue {
            let ctx = TransitionContext::new(TransitionSource::Scheduler)
                .reason("virtual account expired");
            let tx = match self
                .ledger
                .transition(&account.reference, TransactionStatus::Expired, ctx, now)
                .await
            {
                Ok(outcome) => outcome.into_transaction(),
                // The deposit settled in the meantime; mirror whatever it became.
                Err(LedgerError::InvalidTransition { .. }) => {
                    match self.ledger.get(&account.reference).await {
                        Ok(tx) => tx,
                        Err(e) => {
                            report.errors.push(format!("{}: {}", account.reference, e));
                            continue;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(reference = %account.reference, "expiry failed: {}", e);
                    report.errors.push(format!("{}: {}", account.reference, e));
                    continue;
                }
            };
            match self.sync_account(&tx, None, now).await {
                Ok(Some(updated)) if updated.status == VirtualAccountStatus::Expired => {
                    report.expired += 1
                }
                Ok(_) => {}
                Err(e) => report.errors.push(format!("{}: {}", account.reference, e)),
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                expired = report.expired,
                errors = report.errors.len(),
                "virtual account expiry pass finished"
            );
        }
        Ok(report)
    }

    /// Manual decision on a deposit that arrived with the wrong amount.
    pub async fn review_mismatch(
        &self,
        reference: &str,
        accept: bool,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<VirtualAccount, VirtualAccountError> {
        let outcome = self
            .ledger
            .review_mismatch(reference, accept, note, now)
            .await?;
        self.sync_account(outcome.transaction(), None, now).await?;
        self.get(reference, now).await
    }

    /// Bring the account status in line with its ledger transaction.
    pub async fn sync_account(
        &self,
        tx: &Transaction,
        sender_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<VirtualAccount>, VirtualAccountError> {
        let Some(target) = account_status_for(tx.status) else {
            return Ok(None);
        };
        let Some(account) = self.accounts.get_by_reference(&tx.reference).await? else {
            return Ok(None);
        };
        if account.status == target || !account.status.can_transition_to(target) {
            return Ok(None);
        }

        let updated = self
            .accounts
            .update_status(
                &tx.reference,
                account.status,
                target,
                tx.received_amount,
                sender_name,
                now,
            )
            .await?;
        if let Some(updated) = &updated {
            tracing::info!(
                reference = %updated.reference,
                from = %account.status,
                to = %updated.status,
                "virtual account status updated"
            );
        }
        Ok(updated)
    }
}

fn account_status_for(status: TransactionStatus) -> Option<VirtualAccountStatus> {
    match status {
        TransactionStatus::Success
        | TransactionStatus::PartiallyRefunded
        | TransactionStatus::Refunded
        | TransactionStatus::Disputed => Some(VirtualAccountStatus::Success),
        TransactionStatus::Mismatch => Some(VirtualAccountStatus::Mismatch),
        TransactionStatus::Failed | TransactionStatus::Cancelled => {
            Some(VirtualAccountStatus::Failed)
        }
        TransactionStatus::Expired => Some(VirtualAccountStatus::Expired),
        TransactionStatus::Scheduled
        | TransactionStatus::Pending
        | TransactionStatus::Processing => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_status_maps_onto_account_status() {
        assert_eq!(account_status_for(TransactionStatus::Pending), None);
        assert_eq!(
            account_status_for(TransactionStatus::Mismatch),
            Some(VirtualAccountStatus::Mismatch)
        );
        assert_eq!(
            account_status_for(TransactionStatus::Refunded),
            Some(VirtualAccountStatus::Success)
        );
        assert_eq!(
            account_status_for(TransactionStatus::Expired),
            Some(VirtualAccountStatus::Expired)
        );
    }
}
