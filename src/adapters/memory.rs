//! In-memory storage for tests and `STORAGE=memory` development runs.
//!
//! Every operation takes the single store mutex, so each trait call is one atomic unit
//! exactly like a database transaction on the Postgres side.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Balance, BalanceEffect, BalanceError, EntitlementJob, EntitlementJobStatus,
    ScheduledJob, StateConflict, Transaction, TransactionStatus, TransactionType,
    TransitionSource, VirtualAccount, VirtualAccountStatus,
};
use crate::ports::{
    creation_audit, JobRepository, LedgerRepository, OutboxRepository, RepositoryError,
    RepositoryResult, TransitionCommand, VirtualAccountRepository,
};

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, Transaction>,
    references_by_id: HashMap<Uuid, String>,
    balances: HashMap<Uuid, Balance>,
    audit: Vec<AuditEntry>,
    conflicts: Vec<StateConflict>,
    statement_matches: HashMap<String, Uuid>,
    jobs: HashMap<Uuid, EntitlementJob>,
    virtual_accounts: HashMap<String, VirtualAccount>,
    scheduled: HashMap<String, ScheduledJob>,
}

impl Inner {
    fn apply_effect(
        &mut self,
        user_id: Uuid,
        effect: BalanceEffect,
        at: DateTime<Utc>,
    ) -> RepositoryResult<(i64, i64)> {
        let current = self
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Balance::empty(user_id));
        let mut next = effect.apply(&current).map_err(|err| match err {
            BalanceError::Insufficient {
                required,
                available,
            } => RepositoryError::InsufficientBalance {
                required,
                available,
            },
            other => RepositoryError::Corrupt(other.to_string()),
        })?;
        if !effect.is_none() {
            next.updated_at = at;
            self.balances.insert(user_id, next.clone());
        }
        Ok((current.available, next.available))
    }

    fn insert_transaction(
        &mut self,
        tx: Transaction,
        source: TransitionSource,
    ) -> RepositoryResult<()> {
        if self.transactions.contains_key(&tx.reference) {
            return Err(RepositoryError::Duplicate(tx.reference));
        }
        if let Some(retry_of) = tx.transfer_details().and_then(|d| d.retry_of) {
            let taken = self
                .transactions
                .values()
                .any(|t| t.transfer_details().and_then(|d| d.retry_of) == Some(retry_of));
            if taken {
                return Err(RepositoryError::Duplicate(format!("retry of {retry_of}")));
            }
        }
        self.audit.push(creation_audit(&tx, source));
        self.references_by_id.insert(tx.id, tx.reference.clone());
        self.transactions.insert(tx.reference.clone(), tx);
        Ok(())
    }
}

/// One store backing every repository port.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a user's available balance. Test and development seeding only.
    pub async fn set_available(&self, user_id: Uuid, available: i64) {
        let mut inner = self.inner.lock().await;
        let balance = inner
            .balances
            .entry(user_id)
            .or_insert_with(|| Balance::empty(user_id));
        balance.available = available;
    }
}

fn sort_oldest_first(mut txs: Vec<Transaction>, limit: i64) -> Vec<Transaction> {
    txs.sort_by_key(|t| t.created_at);
    txs.truncate(limit.max(0) as usize);
    txs
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn create(
        &self,
        tx: &Transaction,
        effect: BalanceEffect,
        source: TransitionSource,
    ) -> RepositoryResult<Transaction> {
        let mut inner = self.inner.lock().await;
        if inner.transactions.contains_key(&tx.reference) {
            return Err(RepositoryError::Duplicate(tx.reference.clone()));
        }
        let (before, after) = inner.apply_effect(tx.user_id, effect, tx.created_at)?;
        let mut stored = tx.clone();
        if !effect.is_none() {
            stored.balance_before = Some(before);
            stored.balance_after = Some(after);
        }
        if let Err(err) = inner.insert_transaction(stored.clone(), source) {
            // undo the balance change so the whole call stays atomic
            let undo = match effect {
                BalanceEffect::Lock(amount) => BalanceEffect::Release(amount),
                BalanceEffect::Credit(amount) => BalanceEffect::Debit(amount),
                BalanceEffect::Debit(amount) => BalanceEffect::Credit(amount),
                _ => BalanceEffect::None,
            };
            inner.apply_effect(tx.user_id, undo, tx.created_at)?;
            return Err(err);
        }
        Ok(stored)
    }

    async fn get_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner.transactions.get(reference).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .references_by_id
            .get(&id)
            .and_then(|reference| inner.transactions.get(reference))
            .cloned())
    }

    async fn transition(&self, cmd: &TransitionCommand) -> RepositoryResult<Option<Transaction>> {
        let mut inner = self.inner.lock().await;
        let current = match inner.transactions.get(&cmd.reference) {
            Some(tx) => tx.clone(),
            None => return Err(RepositoryError::NotFound(cmd.reference.clone())),
        };
        if current.status != cmd.expected_status || current.version != cmd.expected_version {
            return Ok(None);
        }
        if let Some(child) = &cmd.child {
            if inner.transactions.contains_key(&child.reference) {
                return Err(RepositoryError::Duplicate(child.reference.clone()));
            }
        }

        let (before, after) = inner.apply_effect(current.user_id, cmd.effect, cmd.at)?;
        let next = cmd.apply_to(&current, before, after);
        inner.audit.push(cmd.audit_entry(&next));
        inner.transactions.insert(next.reference.clone(), next.clone());

        if let Some(child) = &cmd.child {
            let mut child = child.clone();
            if !cmd.effect.is_none() {
                child.balance_before = Some(before);
                child.balance_after = Some(after);
            }
            inner.insert_transaction(child, cmd.source)?;
        }
        if let Some(job) = &cmd.event {
            inner.jobs.insert(job.id, job.clone());
        }
        Ok(Some(next))
    }

    async fn find_stale(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let stale = inner
            .transactions
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransactionStatus::Pending | TransactionStatus::Processing
                ) && t.created_at < created_before
            })
            .cloned()
            .collect();
        Ok(sort_oldest_first(stale, limit))
    }

    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let due = inner
            .transactions
            .values()
            .filter(|t| {
                t.status == TransactionStatus::Scheduled && t.due_at.map_or(false, |d| d <= now)
            })
            .cloned()
            .collect();
        Ok(sort_oldest_first(due, limit))
    }

    async fn find_open_transfers(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let open = inner
            .transactions
            .values()
            .filter(|t| {
                t.kind.is_outbound()
                    && matches!(
                        t.status,
                        TransactionStatus::Pending | TransactionStatus::Processing
                    )
            })
            .cloned()
            .collect();
        Ok(sort_oldest_first(open, limit))
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let inner = self.inner.lock().await;
        let matching = inner
            .transactions
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        Ok(sort_oldest_first(matching, limit))
    }

    async fn find_retry_of(&self, original_id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .find(|t| t.transfer_details().and_then(|d| d.retry_of) == Some(original_id))
            .cloned())
    }

    async fn sum_transfers(&self, user_id: Uuid, since: DateTime<Utc>) -> RepositoryResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .transactions
            .values()
            .filter(|t| {
                t.user_id == user_id
                    && t.kind == TransactionType::Transfer
                    && t.status == TransactionStatus::Success
                    && t.created_at >= since
            })
            .map(|t| t.amount)
            .sum())
    }

    async fn balance(&self, user_id: Uuid) -> RepositoryResult<Balance> {
        let inner = self.inner.lock().await;
        Ok(inner
            .balances
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Balance::empty(user_id)))
    }

    async fn audit_trail(&self, transaction_id: Uuid) -> RepositoryResult<Vec<AuditEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .audit
            .iter()
            .filter(|entry| entry.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn record_conflict(&self, conflict: &StateConflict) -> RepositoryResult<bool> {
        let mut inner = self.inner.lock().await;
        let known = inner.conflicts.iter().any(|c| {
            c.reference == conflict.reference
                && c.current_status == conflict.current_status
                && c.observed_status == conflict.observed_status
        });
        if known {
            return Ok(false);
        }
        inner.conflicts.push(conflict.clone());
        Ok(true)
    }

    async fn open_conflicts(&self, limit: i64) -> RepositoryResult<Vec<StateConflict>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conflicts
            .iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn claim_statement_entry(
        &self,
        fingerprint: &str,
        transaction_id: Uuid,
    ) -> RepositoryResult<bool> {
        let mut inner = self.inner.lock().await;
        match inner.statement_matches.get(fingerprint) {
            Some(owner) => Ok(*owner == transaction_id),
            None => {
                inner
                    .statement_matches
                    .insert(fingerprint.to_string(), transaction_id);
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl OutboxRepository for MemoryStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> RepositoryResult<Vec<EntitlementJob>> {
        let mut inner = self.inner.lock().await;
        let mut due: Vec<&mut EntitlementJob> = inner
            .jobs
            .values_mut()
            .filter(|job| job.status == EntitlementJobStatus::Pending && job.due_at <= now)
            .collect();
        due.sort_by_key(|job| job.due_at);
        Ok(due
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|job| {
                job.due_at = now + lease;
                job.clone()
            })
            .collect())
    }

    async fn mark_delivered(&self, id: Uuid, attempts: u32) -> RepositoryResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        job.status = EntitlementJobStatus::Delivered;
        job.attempts = attempts;
        job.last_error = None;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        due_at: DateTime<Utc>,
        error: &str,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        job.attempts = attempts;
        job.due_at = due_at;
        job.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid, attempts: u32, error: &str) -> RepositoryResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;
        job.status = EntitlementJobStatus::Dead;
        job.attempts = attempts;
        job.last_error = Some(error.to_string());
        Ok(())
    }

    async fn jobs_for_reference(&self, reference: &str) -> RepositoryResult<Vec<EntitlementJob>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<EntitlementJob> = inner
            .jobs
            .values()
            .filter(|job| job.reference == reference)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

#[async_trait]
impl VirtualAccountRepository for MemoryStore {
    async fn insert_within_quota(
        &self,
        account: &VirtualAccount,
        max_active: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<VirtualAccount> {
        let mut inner = self.inner.lock().await;
        let active = inner
            .virtual_accounts
            .values()
            .filter(|va| {
                va.user_id == account.user_id
                    && va.status == VirtualAccountStatus::Pending
                    && va.expires_at > now
            })
            .count() as i64;
        if active >= max_active {
            return Err(RepositoryError::QuotaExceeded {
                active,
                limit: max_active,
            });
        }
        if inner.virtual_accounts.contains_key(&account.reference) {
            return Err(RepositoryError::Duplicate(account.reference.clone()));
        }
        inner
            .virtual_accounts
            .insert(account.reference.clone(), account.clone());
        Ok(account.clone())
    }

    async fn count_active(&self, user_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .virtual_accounts
            .values()
            .filter(|va| {
                va.user_id == user_id
                    && va.status == VirtualAccountStatus::Pending
                    && va.expires_at > now
            })
            .count() as i64)
    }

    async fn get_by_reference(&self, reference: &str) -> RepositoryResult<Option<VirtualAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner.virtual_accounts.get(reference).cloned())
    }

    async fn get_by_account_number(
        &self,
        account_number: &str,
    ) -> RepositoryResult<Option<VirtualAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .virtual_accounts
            .values()
            .filter(|va| va.account_number == account_number)
            .max_by_key(|va| va.created_at)
            .cloned())
    }

    async fn update_status(
        &self,
        reference: &str,
        expected: VirtualAccountStatus,
        next: VirtualAccountStatus,
        deposited_amount: Option<i64>,
        sender_name: Option<String>,
        at: DateTime<Utc>,
    ) -> RepositoryResult<Option<VirtualAccount>> {
        let mut inner = self.inner.lock().await;
        let account = match inner.virtual_accounts.get_mut(reference) {
            Some(account) => account,
            None => return Err(RepositoryError::NotFound(reference.to_string())),
        };
        if account.status != expected {
            return Ok(None);
        }
        account.status = next;
        if deposited_amount.is_some() {
            account.deposited_amount = deposited_amount;
        }
        if sender_name.is_some() {
            account.sender_name = sender_name;
        }
        account.updated_at = at;
        Ok(Some(account.clone()))
    }

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<VirtualAccount>> {
        let inner = self.inner.lock().await;
        let mut overdue: Vec<VirtualAccount> = inner
            .virtual_accounts
            .values()
            .filter(|va| va.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|va| va.expires_at);
        overdue.truncate(limit.max(0) as usize);
        Ok(overdue)
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn ensure(&self, name: &str, due_at: DateTime<Utc>) -> RepositoryResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .scheduled
            .entry(name.to_string())
            .or_insert_with(|| ScheduledJob {
                name: name.to_string(),
                due_at,
                locked_until: None,
                last_run_at: None,
                last_error: None,
            });
        Ok(())
    }

    async fn claim(
        &self,
        name: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> RepositoryResult<bool> {
        let mut inner = self.inner.lock().await;
        let job = match inner.scheduled.get_mut(name) {
            Some(job) => job,
            None => return Ok(false),
        };
        let leased = job.locked_until.map_or(false, |until| until > now);
        if job.due_at > now || leased {
            return Ok(false);
        }
        job.locked_until = Some(now + lease);
        Ok(true)
    }

    async fn complete(
        &self,
        name: &str,
        ran_at: DateTime<Utc>,
        next_due: DateTime<Utc>,
        error: Option<String>,
    ) -> RepositoryResult<()> {
        let mut inner = self.inner.lock().await;
        let job = inner
            .scheduled
            .get_mut(name)
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))?;
        job.due_at = next_due;
        job.locked_until = None;
        job.last_run_at = Some(ran_at);
        job.last_error = error;
        Ok(())
    }

    async fn get(&self, name: &str) -> RepositoryResult<Option<ScheduledJob>> {
        let inner = self.inner.lock().await;
        Ok(inner.scheduled.get(name).cloned())
    }
}
