//! Postgres implementation of the ledger and entitlement outbox ports.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::{
    AuditEntry, Balance, BalanceEffect, EntitlementJob, StateConflict, Transaction,
    TransactionStatus, TransitionSource, VersionedDetails,
};
use crate::ports::{
    creation_audit, LedgerRepository, OutboxRepository, RepositoryError, RepositoryResult,
    TransitionCommand,
};

const TX_COLUMNS: &str = "id, reference, user_id, kind, status, amount, received_amount, \
    refunded_amount, balance_before, balance_after, gateway_ref, failure_reason, details, \
    version, due_at, created_at, updated_at, completed_at, settled_at";

const JOB_COLUMNS: &str =
    "id, transaction_id, reference, event, attempts, status, due_at, last_error, created_at";

/// Postgres-backed ledger. Every write runs inside one database transaction.
#[derive(Clone)]
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn apply_effect(
    conn: &mut PgConnection,
    user_id: Uuid,
    effect: BalanceEffect,
    at: DateTime<Utc>,
) -> RepositoryResult<(i64, i64)> {
    let (sql, amount) = match effect {
        BalanceEffect::None => return Ok((0, 0)),
        BalanceEffect::Credit(amount) => (
            "UPDATE balances SET available = available + $2, updated_at = $3 \
             WHERE user_id = $1 RETURNING available - $2, available",
            amount,
        ),
        BalanceEffect::Debit(amount) => (
            "UPDATE balances SET available = available - $2, updated_at = $3 \
             WHERE user_id = $1 RETURNING available + $2, available",
            amount,
        ),
        BalanceEffect::Lock(amount) => (
            "UPDATE balances SET available = available - $2, locked = locked + $2, updated_at = $3 \
             WHERE user_id = $1 AND available >= $2 RETURNING available + $2, available",
            amount,
        ),
        BalanceEffect::Release(amount) => (
            "UPDATE balances SET available = available + $2, locked = locked - $2, updated_at = $3 \
             WHERE user_id = $1 AND locked >= $2 RETURNING available - $2, available",
            amount,
        ),
        BalanceEffect::Capture(amount) => (
            "UPDATE balances SET locked = locked - $2, updated_at = $3 \
             WHERE user_id = $1 AND locked >= $2 RETURNING available, available",
            amount,
        ),
    };

    sqlx::query("INSERT INTO balances (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let updated = sqlx::query_as::<_, (i64, i64)>(sql)
        .bind(user_id)
        .bind(amount)
        .bind(at)
        .fetch_optional(&mut *conn)
        .await?;

    match updated {
        Some(pair) => Ok(pair),
        None => {
            let (available, locked) = sqlx::query_as::<_, (i64, i64)>(
                "SELECT available, locked FROM balances WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_one(&mut *conn)
            .await?;
            match effect {
                BalanceEffect::Lock(required) => Err(RepositoryError::InsufficientBalance {
                    required,
                    available,
                }),
                _ => Err(RepositoryError::Corrupt(format!(
                    "locked balance {locked} cannot cover {amount} for user {user_id}"
                ))),
            }
        }
    }
}

fn details_json(tx: &Transaction) -> RepositoryResult<serde_json::Value> {
    serde_json::to_value(VersionedDetails::from(tx.details.clone()))
        .map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

async fn insert_transaction(
    conn: &mut PgConnection,
    tx: &Transaction,
    source: TransitionSource,
) -> RepositoryResult<()> {
    let retry_of = tx.transfer_details().and_then(|d| d.retry_of);
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, reference, user_id, kind, status, amount, received_amount, refunded_amount,
            balance_before, balance_after, gateway_ref, failure_reason, details, retry_of,
            version, due_at, created_at, updated_at, completed_at, settled_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
        "#,
    )
    .bind(tx.id)
    .bind(&tx.reference)
    .bind(tx.user_id)
    .bind(tx.kind.as_str())
    .bind(tx.status.as_str())
    .bind(tx.amount)
    .bind(tx.received_amount)
    .bind(tx.refunded_amount)
    .bind(tx.balance_before)
    .bind(tx.balance_after)
    .bind(&tx.gateway_ref)
    .bind(&tx.failure_reason)
    .bind(details_json(tx)?)
    .bind(retry_of)
    .bind(tx.version)
    .bind(tx.due_at)
    .bind(tx.created_at)
    .bind(tx.updated_at)
    .bind(tx.completed_at)
    .bind(tx.settled_at)
    .execute(&mut *conn)
    .await?;

    insert_audit(conn, &creation_audit(tx, source)).await
}

async fn insert_audit(conn: &mut PgConnection, entry: &AuditEntry) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transaction_audit (
            id, transaction_id, reference, from_status, to_status, source, reason, recorded_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.transaction_id)
    .bind(&entry.reference)
    .bind(entry.from_status.map(|s| s.as_str()))
    .bind(entry.to_status.as_str())
    .bind(entry.source.as_str())
    .bind(&entry.reason)
    .bind(entry.recorded_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_job(conn: &mut PgConnection, job: &EntitlementJob) -> RepositoryResult<()> {
    let event =
        serde_json::to_value(&job.event).map_err(|e| RepositoryError::Corrupt(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO entitlement_jobs (
            id, transaction_id, reference, event, attempts, status, due_at, last_error, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(job.id)
    .bind(job.transaction_id)
    .bind(&job.reference)
    .bind(event)
    .bind(job.attempts as i32)
    .bind(job.status.as_str())
    .bind(job.due_at)
    .bind(&job.last_error)
    .bind(job.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn create(
        &self,
        tx: &Transaction,
        effect: BalanceEffect,
        source: TransitionSource,
    ) -> RepositoryResult<Transaction> {
        let mut db_tx = self.pool.begin().await?;
        let (before, after) = apply_effect(&mut *db_tx, tx.user_id, effect, tx.created_at).await?;
        let mut stored = tx.clone();
        if !effect.is_none() {
            stored.balance_before = Some(before);
            stored.balance_after = Some(after);
        }
        insert_transaction(&mut *db_tx, &stored, source)
            .await
            .map_err(|err| match err {
                RepositoryError::Duplicate(_) => RepositoryError::Duplicate(tx.reference.clone()),
                other => other,
            })?;
        db_tx.commit().await?;
        Ok(stored)
    }

    async fn get_by_reference(&self, reference: &str) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn transition(&self, cmd: &TransitionCommand) -> RepositoryResult<Option<Transaction>> {
        let mut db_tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE reference = $1 FOR UPDATE"
        ))
        .bind(&cmd.reference)
        .fetch_optional(&mut *db_tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(cmd.reference.clone()))?
        .into_domain()?;

        if current.status != cmd.expected_status || current.version != cmd.expected_version {
            return Ok(None);
        }

        let (before, after) = apply_effect(&mut *db_tx, current.user_id, cmd.effect, cmd.at).await?;
        let next = cmd.apply_to(&current, before, after);

        let updated = sqlx::query(
            r#"
            UPDATE transactions SET
                status = $3, version = $4, updated_at = $5, gateway_ref = $6,
                received_amount = $7, failure_reason = $8, details = $9, refunded_amount = $10,
                balance_before = $11, balance_after = $12, completed_at = $13, settled_at = $14
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(next.id)
        .bind(cmd.expected_version)
        .bind(next.status.as_str())
        .bind(next.version)
        .bind(next.updated_at)
        .bind(&next.gateway_ref)
        .bind(next.received_amount)
        .bind(&next.failure_reason)
        .bind(details_json(&next)?)
        .bind(next.refunded_amount)
        .bind(next.balance_before)
        .bind(next.balance_after)
        .bind(next.completed_at)
        .bind(next.settled_at)
        .execute(&mut *db_tx)
        .await?;

        if updated.rows_affected() != 1 {
            return Ok(None);
        }

        insert_audit(&mut *db_tx, &cmd.audit_entry(&next)).await?;

        if let Some(child) = &cmd.child {
            let mut child = child.clone();
            if !cmd.effect.is_none() {
                child.balance_before = Some(before);
                child.balance_after = Some(after);
            }
            insert_transaction(&mut *db_tx, &child, cmd.source).await?;
        }
        if let Some(job) = &cmd.event {
            insert_job(&mut *db_tx, job).await?;
        }

        db_tx.commit().await?;
        Ok(Some(next))
    }

    async fn find_stale(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE status IN ('pending', 'processing') AND created_at < $1 \
             ORDER BY created_at LIMIT $2"
        ))
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE status = 'scheduled' AND due_at <= $1 \
             ORDER BY due_at LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn find_open_transfers(&self, limit: i64) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE kind IN ('transfer', 'withdrawal') AND status IN ('pending', 'processing') \
             ORDER BY created_at LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_by_status(
        &self,
        status: TransactionStatus,
        limit: i64,
    ) -> RepositoryResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE status = $1 ORDER BY created_at LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn find_retry_of(&self, original_id: Uuid) -> RepositoryResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE retry_of = $1"
        ))
        .bind(original_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn sum_transfers(&self, user_id: Uuid, since: DateTime<Utc>) -> RepositoryResult<i64> {
        let (total,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM transactions \
             WHERE user_id = $1 AND kind = 'transfer' AND status = 'success' AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn balance(&self, user_id: Uuid) -> RepositoryResult<Balance> {
        let row = sqlx::query_as::<_, BalanceRow>(
            "SELECT user_id, available, locked, updated_at FROM balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(BalanceRow::into_domain)
            .unwrap_or_else(|| Balance::empty(user_id)))
    }

    async fn audit_trail(&self, transaction_id: Uuid) -> RepositoryResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, transaction_id, reference, from_status, to_status, source, reason, recorded_at \
             FROM transaction_audit WHERE transaction_id = $1 ORDER BY recorded_at, id",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::into_domain).collect()
    }

    async fn record_conflict(&self, conflict: &StateConflict) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO state_conflicts (
                id, reference, current_status, observed_status, source, detail, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT state_conflicts_dedup DO NOTHING
            "#,
        )
        .bind(conflict.id)
        .bind(&conflict.reference)
        .bind(conflict.current_status.as_str())
        .bind(conflict.observed_status.as_str())
        .bind(conflict.source.as_str())
        .bind(&conflict.detail)
        .bind(conflict.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn open_conflicts(&self, limit: i64) -> RepositoryResult<Vec<StateConflict>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            "SELECT id, reference, current_status, observed_status, source, detail, recorded_at \
             FROM state_conflicts WHERE resolved_at IS NULL ORDER BY recorded_at LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ConflictRow::into_domain).collect()
    }

    async fn claim_statement_entry(
        &self,
        fingerprint: &str,
        transaction_id: Uuid,
    ) -> RepositoryResult<bool> {
        sqlx::query(
            "INSERT INTO statement_matches (fingerprint, transaction_id) VALUES ($1, $2) \
             ON CONFLICT (fingerprint) DO NOTHING",
        )
        .bind(fingerprint)
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;

        let (owner,) = sqlx::query_as::<_, (Uuid,)>(
            "SELECT transaction_id FROM statement_matches WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(owner == transaction_id)
    }
}

#[async_trait]
impl OutboxRepository for PostgresLedgerRepository {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
        limit: i64,
    ) -> RepositoryResult<Vec<EntitlementJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE entitlement_jobs SET due_at = $2
            WHERE id IN (
                SELECT id FROM entitlement_jobs
                WHERE status = 'pending' AND due_at <= $1
                ORDER BY due_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now + lease)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_domain).collect()
    }

    async fn mark_delivered(&self, id: Uuid, attempts: u32) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE entitlement_jobs SET status = 'delivered', attempts = $2, last_error = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempts as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        due_at: DateTime<Utc>,
        error: &str,
    ) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE entitlement_jobs SET attempts = $2, due_at = $3, last_error = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(attempts as i32)
        .bind(due_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_dead(&self, id: Uuid, attempts: u32, error: &str) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE entitlement_jobs SET status = 'dead', attempts = $2, last_error = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(attempts as i32)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn jobs_for_reference(&self, reference: &str) -> RepositoryResult<Vec<EntitlementJob>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM entitlement_jobs WHERE reference = $1 ORDER BY created_at"
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRow::into_domain).collect()
    }
}

fn parse<T: std::str::FromStr<Err = String>>(value: &str) -> RepositoryResult<T> {
    value.parse().map_err(RepositoryError::Corrupt)
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    user_id: Uuid,
    kind: String,
    status: String,
    amount: i64,
    received_amount: Option<i64>,
    refunded_amount: i64,
    balance_before: Option<i64>,
    balance_after: Option<i64>,
    gateway_ref: Option<String>,
    failure_reason: Option<String>,
    details: serde_json::Value,
    version: i64,
    due_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    settled_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        let details: VersionedDetails = serde_json::from_value(self.details)
            .map_err(|e| RepositoryError::Corrupt(format!("{}: {}", self.reference, e)))?;
        Ok(Transaction {
            id: self.id,
            kind: parse(&self.kind)?,
            status: parse(&self.status)?,
            reference: self.reference,
            user_id: self.user_id,
            amount: self.amount,
            received_amount: self.received_amount,
            refunded_amount: self.refunded_amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            gateway_ref: self.gateway_ref,
            failure_reason: self.failure_reason,
            details: details.details,
            version: self.version,
            due_at: self.due_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            settled_at: self.settled_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    user_id: Uuid,
    available: i64,
    locked: i64,
    updated_at: DateTime<Utc>,
}

impl BalanceRow {
    fn into_domain(self) -> Balance {
        Balance {
            user_id: self.user_id,
            available: self.available,
            locked: self.locked,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    transaction_id: Uuid,
    reference: String,
    from_status: Option<String>,
    to_status: String,
    source: String,
    reason: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_domain(self) -> RepositoryResult<AuditEntry> {
        Ok(AuditEntry {
            id: self.id,
            transaction_id: self.transaction_id,
            reference: self.reference,
            from_status: self.from_status.as_deref().map(parse).transpose()?,
            to_status: parse(&self.to_status)?,
            source: parse(&self.source)?,
            reason: self.reason,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ConflictRow {
    id: Uuid,
    reference: String,
    current_status: String,
    observed_status: String,
    source: String,
    detail: String,
    recorded_at: DateTime<Utc>,
}

impl ConflictRow {
    fn into_domain(self) -> RepositoryResult<StateConflict> {
        Ok(StateConflict {
            id: self.id,
            current_status: parse(&self.current_status)?,
            observed_status: parse(&self.observed_status)?,
            reference: self.reference,
            source: parse(&self.source)?,
            detail: self.detail,
            recorded_at: self.recorded_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    transaction_id: Uuid,
    reference: String,
    event: serde_json::Value,
    attempts: i32,
    status: String,
    due_at: DateTime<Utc>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_domain(self) -> RepositoryResult<EntitlementJob> {
        let event = serde_json::from_value(self.event)
            .map_err(|e| RepositoryError::Corrupt(format!("{}: {}", self.reference, e)))?;
        Ok(EntitlementJob {
            id: self.id,
            transaction_id: self.transaction_id,
            reference: self.reference,
            event,
            attempts: self.attempts.max(0) as u32,
            status: parse(&self.status)?,
            due_at: self.due_at,
            last_error: self.last_error,
            created_at: self.created_at,
        })
    }
}
