use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::domain::ScheduledJob;
use crate::ports::{JobRepository, RepositoryError, RepositoryResult};

/// Leases on `scheduled_jobs` rows; one poller wins each due run.
#[derive(Clone)]
pub struct PostgresJobRepository {
    pool: PgPool,
}

impl PostgresJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PostgresJobRepository {
    async fn ensure(&self, name: &str, due_at: DateTime<Utc>) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO scheduled_jobs (name, due_at) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(due_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim(
        &self,
        name: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET locked_until = $3 \
             WHERE name = $1 AND due_at <= $2 AND (locked_until IS NULL OR locked_until <= $2)",
        )
        .bind(name)
        .bind(now)
        .bind(now + lease)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        name: &str,
        ran_at: DateTime<Utc>,
        next_due: DateTime<Utc>,
        error: Option<String>,
    ) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET due_at = $2, locked_until = NULL, last_run_at = $3, last_error = $4 \
             WHERE name = $1",
        )
        .bind(name)
        .bind(next_due)
        .bind(ran_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(name.to_string()));
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> RepositoryResult<Option<ScheduledJob>> {
        let row = sqlx::query_as::<_, ScheduledJobRow>(
            "SELECT name, due_at, locked_until, last_run_at, last_error FROM scheduled_jobs WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ScheduledJob {
            name: r.name,
            due_at: r.due_at,
            locked_until: r.locked_until,
            last_run_at: r.last_run_at,
            last_error: r.last_error,
        }))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduledJobRow {
    name: String,
    due_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}
