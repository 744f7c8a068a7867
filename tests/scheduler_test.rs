mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use settlement_core::domain::TransactionStatus;
use settlement_core::ports::JobRepository;
use settlement_core::services::scheduler::{JobKind, JobScheduler};

use common::{harness, Harness};

fn scheduler(h: &Harness) -> JobScheduler {
    JobScheduler::new(
        h.services.repositories.jobs.clone(),
        h.services.clone(),
        JobScheduler::default_definitions("0 */15 * * * *").unwrap(),
    )
}

#[tokio::test]
async fn test_nothing_runs_before_first_due_time() {
    let h = harness();
    let now = Utc::now();
    let jobs = scheduler(&h);
    jobs.register(now).await.unwrap();

    let runs = jobs.run_due(now).await;
    assert!(runs.is_empty());
}

#[tokio::test]
async fn test_leased_job_is_skipped_by_other_instances() {
    let h = harness();
    let now = Utc::now();
    let first = scheduler(&h);
    let second = scheduler(&h);
    first.register(now).await.unwrap();

    let later = now + Duration::hours(1);
    let sweep = JobKind::StalenessSweep.name();
    // another instance holds the sweep
    assert!(h
        .services
        .repositories
        .jobs
        .claim(sweep, later, Duration::minutes(10))
        .await
        .unwrap());

    let runs = second.run_due(later).await;
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|run| run.job != sweep));
    assert!(runs.iter().all(|run| run.summary.is_ok()));

    // completed jobs moved on; the leased one is still held
    assert!(first.run_due(later).await.is_empty());

    let after_lease = later + Duration::minutes(11);
    let runs = first.run_due(after_lease).await;
    assert!(runs.iter().any(|run| run.job == sweep));
}

#[tokio::test]
async fn test_due_job_runs_its_work() {
    let h = harness();
    let user = Uuid::new_v4();
    let now = Utc::now();
    h.seed_deposit("DVA_STALE", user, 50_000, now - Duration::hours(48))
        .await;
    let jobs = scheduler(&h);
    jobs.register(now).await.unwrap();

    let runs = jobs.run_due(now + Duration::hours(1)).await;
    let sweep = runs
        .iter()
        .find(|run| run.job == JobKind::StalenessSweep.name())
        .unwrap();
    assert!(sweep.summary.is_ok());

    let tx = h.services.ledger.get("DVA_STALE").await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Failed);
    let job = h
        .services
        .repositories
        .jobs
        .get(JobKind::StalenessSweep.name())
        .await
        .unwrap()
        .unwrap();
    assert!(job.due_at > now + Duration::hours(1));
    assert!(job.last_error.is_none());
}
