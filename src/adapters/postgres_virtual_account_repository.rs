//! Postgres implementation of VirtualAccountRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{VirtualAccount, VirtualAccountStatus};
use crate::ports::{RepositoryError, RepositoryResult, VirtualAccountRepository};

const VA_COLUMNS: &str = "id, reference, user_id, account_number, account_name, bank_name, \
    expected_amount, deposited_amount, sender_name, status, expires_at, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresVirtualAccountRepository {
    pool: PgPool,
}

impl PostgresVirtualAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VirtualAccountRepository for PostgresVirtualAccountRepository {
    async fn insert_within_quota(
        &self,
        account: &VirtualAccount,
        max_active: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<VirtualAccount> {
        let mut db_tx = self.pool.begin().await?;

        // serialises concurrent creations for one user until commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(account.user_id)
            .execute(&mut *db_tx)
            .await?;

        let (active,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM virtual_accounts \
             WHERE user_id = $1 AND status = 'pending' AND expires_at > $2",
        )
        .bind(account.user_id)
        .bind(now)
        .fetch_one(&mut *db_tx)
        .await?;

        if active >= max_active {
            return Err(RepositoryError::QuotaExceeded {
                active,
                limit: max_active,
            });
        }

        let row = sqlx::query_as::<_, VirtualAccountRow>(&format!(
            r#"
            INSERT INTO virtual_accounts (
                id, reference, user_id, account_number, account_name, bank_name,
                expected_amount, deposited_amount, sender_name, status, expires_at,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {VA_COLUMNS}
            "#
        ))
        .bind(account.id)
        .bind(&account.reference)
        .bind(account.user_id)
        .bind(&account.account_number)
        .bind(&account.account_name)
        .bind(&account.bank_name)
        .bind(account.expected_amount)
        .bind(account.deposited_amount)
        .bind(&account.sender_name)
        .bind(account.status.as_str())
        .bind(account.expires_at)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&mut *db_tx)
        .await?;

        db_tx.commit().await?;
        row.into_domain()
    }

    async fn count_active(&self, user_id: Uuid, now: DateTime<Utc>) -> RepositoryResult<i64> {
        let (active,) = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM virtual_accounts \
             WHERE user_id = $1 AND status = 'pending' AND expires_at > $2",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(active)
    }

    async fn get_by_reference(&self, reference: &str) -> RepositoryResult<Option<VirtualAccount>> {
        let row = sqlx::query_as::<_, VirtualAccountRow>(&format!(
            "SELECT {VA_COLUMNS} FROM virtual_accounts WHERE reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VirtualAccountRow::into_domain).transpose()
    }

    async fn get_by_account_number(
        &self,
        account_number: &str,
    ) -> RepositoryResult<Option<VirtualAccount>> {
        let row = sqlx::query_as::<_, VirtualAccountRow>(&format!(
            "SELECT {VA_COLUMNS} FROM virtual_accounts WHERE account_number = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(account_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(VirtualAccountRow::into_domain).transpose()
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
        let row = sqlx::query_as::<_, VirtualAccountRow>(&format!(
            r#"
            UPDATE virtual_accounts SET
                status = $3,
                deposited_amount = COALESCE($4, deposited_amount),
                sender_name = COALESCE($5, sender_name),
                updated_at = $6
            WHERE reference = $1 AND status = $2
            RETURNING {VA_COLUMNS}
            "#
        ))
        .bind(reference)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(deposited_amount)
        .bind(sender_name)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_domain().map(Some),
            None => match self.get_by_reference(reference).await? {
                Some(_) => Ok(None),
                None => Err(RepositoryError::NotFound(reference.to_string())),
            },
        }
    }

    async fn find_overdue(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<VirtualAccount>> {
        let rows = sqlx::query_as::<_, VirtualAccountRow>(&format!(
            "SELECT {VA_COLUMNS} FROM virtual_accounts \
             WHERE status = 'pending' AND expires_at <= $1 ORDER BY expires_at LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(VirtualAccountRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct VirtualAccountRow {
    id: Uuid,
    reference: String,
    user_id: Uuid,
    account_number: String,
    account_name: String,
    bank_name: String,
    expected_amount: i64,
    deposited_amount: Option<i64>,
    sender_name: Option<String>,
    status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl VirtualAccountRow {
    fn into_domain(self) -> RepositoryResult<VirtualAccount> {
        Ok(VirtualAccount {
            id: self.id,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            reference: self.reference,
            user_id: self.user_id,
            account_number: self.account_number,
            account_name: self.account_name,
            bank_name: self.bank_name,
            expected_amount: self.expected_amount,
            deposited_amount: self.deposited_amount,
            sender_name: self.sender_name,
            expires_at: self.expires_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
