//! Storage ports. Services depend on these traits; adapters implement them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Balance, BalanceEffect, EntitlementJob, ScheduledJob, StateConflict, Transaction,
    TransactionDetails, TransactionStatus, TransitionSource, VirtualAccount, VirtualAccountStatus,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },
    #[error("quota exceeded: {active} active, limit {limit}")]
    QuotaExceeded { active: i64, limit: i64 },
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return RepositoryError::Duplicate(db_err.message().to_string());
            }
        }
        RepositoryError::Database(err)
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// One compare-and-set step of the ledger state machine.
///
/// Applied atomically: the status/version compare, the status write, the balance effect,
/// the audit entry, the outbox event and the optional child transaction either all land
/// or none do.
#[derive(Debug, Clone)]
pub struct TransitionCommand {
    pub reference: String,
    pub expected_status: TransactionStatus,
    pub expected_version: i64,
    pub to: TransactionStatus,
    pub effect: BalanceEffect,
    pub source: TransitionSource,
    pub reason: Option<String>,
    pub failure_reason: Option<String>,
    pub gateway_ref: Option<String>,
    pub received_amount: Option<i64>,
    pub refunded_delta: i64,
    pub details: Option<TransactionDetails>,
    pub event: Option<EntitlementJob>,
    pub child: Option<Transaction>,
    pub at: DateTime<Utc>,
}

impl TransitionCommand {
    pub fn new(
        current: &Transaction,
        to: TransactionStatus,
        source: TransitionSource,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            reference: current.reference.clone(),
            expected_status: current.status,
            expected_version: current.version,
            to,
            effect: BalanceEffect::None,
            source,
            reason: None,
            failure_reason: None,
            gateway_ref: None,
            received_amount: None,
            refunded_delta: 0,
            details: None,
            event: None,
            child: None,
            at,
        }
    }

    pub fn effect(mut self, effect: BalanceEffect) -> Self {
        self.effect = effect;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.reason = Some(reason.clone());
        self.failure_reason = Some(reason);
        self
    }

    pub fn gateway_ref(mut self, gateway_ref: Option<String>) -> Self {
        self.gateway_ref = gateway_ref;
        self
    }

    pub fn received(mut self, amount: Option<i64>) -> Self {
        self.received_amount = amount;
        self
    }

    pub fn refunded(mut self, delta: i64) -> Self {
        self.refunded_delta = delta;
        self
    }

    pub fn details(mut self, details: TransactionDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn event(mut self, job: Option<EntitlementJob>) -> Self {
        self.event = job;
        self
    }

    pub fn child(mut self, child: Transaction) -> Self {
        self.child = Some(child);
        self
    }

    /// Apply the command to an in-memory copy; used by adapters after the compare succeeded.
    pub fn apply_to(&self, tx: &Transaction, before: i64, after: i64) -> Transaction {
        let mut next = tx.clone();
        next.status = self.to;
        next.version += 1;
        next.updated_at = self.at;
        if self.gateway_ref.is_some() {
            next.gateway_ref = self.gateway_ref.clone();
        }
        if self.received_amount.is_some() {
            next.received_amount = self.received_amount;
        }
        if self.failure_reason.is_some() {
            next.failure_reason = self.failure_reason.clone();
        }
        if let Some(details) = &self.details {
            next.details = details.clone();
        }
        next.refunded_amount += self.refunded_delta;
        if !self.effect.is_none() {
            next.balance_before = Some(before);
            next.balance_after = Some(after);
        }
        if self.to.is_terminal() || self.to == TransactionStatus::Mismatch {
            next.completed_at.get_or_insert(self.at);
        }
        if self.to == TransactionStatus::Success {
            next.settled_at.get_or_insert(self.at);
        }
        next
    }

    pub fn audit_entry(&self, tx: &Transaction) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            from_status: Some(self.expected_status),
            to_status: self.to,
            source: self.source,
            reason: self.reason.clone(),
            recorded_at: self.at,
        }
    }
}

/// Audit entry written when a transaction is first recorded.
pub fn creation_audit(tx: &Transaction, source: TransitionSource) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4(),
        transaction_id: tx.id,
        reference: tx.reference.clone(),
        from_status: None,
        to_status: tx.status,
        source,
        reason: None,
        recorded_at: tx.created_at,
    }
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Insert a transaction with its initial balance effect. Fails with `Duplicate` on a
    /// reused reference and `InsufficientBalance` when a lock cannot be taken.
    async fn create(
        &self,
        tx: &Transaction,
        effect: BalanceEffect,
        source: TransitionSource,
    ) -> RepositoryResult<Transaction>;

    async fn get_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    /// Returns `None` when the compare lost: the row moved on since it was read.
    async fn transition(&self, cmd: &TransitionCommand) -> RepositoryResult<Option<Transaction>>;

    /// Pending or processing transactions created before `created_before`, oldest first.
    async fn find_stale(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    /// Pending or processing outbound transfers, oldest first.
    async fn find_open_transfers(&self, limit: i64) -> RepositoryResult<Vec<Transaction>>;

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>>;

    async fn find_retry_of(&self, original_id: Uuid) -> RepositoryResult<Option<Transaction>>;

    /// Sum of successful transfer amounts created at or after `since`.
    async fn sum_transfers(&self, user_id: Uuid, since: DateTime<Utc>) -> RepositoryResult<i64>;

    async fn balance(&self, user_id: Uuid) -> RepositoryResult<Balance>;

    async fn audit_trail(&self, transaction_id: Uuid) -> RepositoryResult<Vec<AuditEntry>>;

    /// Returns false when an identical open conflict is already on record.
    async fn record_conflict(&self, conflict: &StateConflict) -> RepositoryResult<bool>;

    async fn open_conflicts(&self, limit: i64) -> RepositoryResult<Vec<StateConflict>>;

    /// Claim a statement entry for a transaction. True when the claim is new or already
    /// held by the same transaction.
    async fn claim_statement_entry(
        &self,
        fingerprint: &str,
        transaction_id: Uuid,
    ) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Claim pending jobs due at `now`, pushing their `due_at` forward by `lease`.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> RepositoryResult<Vec<EntitlementJob>>;

    async fn mark_delivered(&self, id: Uuid, attempts: u32) -> RepositoryResult<()>;

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        due_at: DateTime<Utc>,
        error: &str,
    ) -> RepositoryResult<()>;

    async fn mark_dead(&self, id: Uuid, attempts: u32, error: &str) -> RepositoryResult<()>;

    async fn jobs_for_reference(&self, reference: &str) -> RepositoryResult<Vec<EntitlementJob>>;
}

#[async_trait]
pub trait VirtualAccountRepository: Send + Sync {
    /// Insert unless the user already holds `max_active` live pending accounts.
    async fn insert_within_quota(
        &self,
        account: &VirtualAccount,
        max_active: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<VirtualAccount>;

    async fn count_active(&self, user_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64>;

    async fn get_by_reference(&self, reference: &str) -> RepositoryResult<Option<VirtualAccount>>;

    async fn get_by_account_number(
        &self,
        account_number: &str,
    ) -> RepositoryResult<Option<VirtualAccount>>;

    /// Compare-and-set on status. `None` when the account was not in `expected`.
    async fn update_status(
        &self,
        reference: &str,
        expected: VirtualAccountStatus,
        next: VirtualAccountStatus,
        deposited_amount: Option<i64>,
        sender_name: Option<String>,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<VirtualAccount>>;

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<VirtualAccount>>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Register a job if it does not exist yet.
    async fn ensure(&self, name: &str, due_at: DateTime<Utc>) -> RepositoryResult<()>;

    /// Take the lease on a due job. False when not due or leased elsewhere.
    async fn claim(&self, name: &str, now: DateTime<Utc>, lease: Duration)
        -> RepositoryResult<bool>;

    async fn complete(
        &self,
        name: &str,
        ran_at: DateTime<Utc>,
        next_due: DateTime<Utc>,
        error: Option<String>,
    ) -> RepositoryResult<()>;

    async fn get(&self, name: &str) -> RepositoryResult<Option<ScheduledJob>>;
}
