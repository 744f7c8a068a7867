use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::ports::JobRepository;
use crate::services::SettlementServices;

const POLL_INTERVAL_SECS: u64 = 5;

/// Periodic work the settlement core runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    StalenessSweep,
    VirtualAccountExpiry,
    EntitlementRetry,
    ScheduledTransfers,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::StalenessSweep => "reconciliation.staleness_sweep",
            JobKind::VirtualAccountExpiry => "virtual_accounts.expiry",
            JobKind::EntitlementRetry => "entitlements.retry",
            JobKind::ScheduledTransfers => "transfers.scheduled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub kind: JobKind,
    pub schedule: Schedule,
}

impl JobDefinition {
    pub fn new(kind: JobKind, expression: &str) -> Result<Self, cron::error::Error> {
        Ok(Self {
            kind,
            schedule: Schedule::from_str(expression)?,
        })
    }

    fn next_after(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.schedule
            .after(&at)
            .next()
            .unwrap_or(at + Duration::hours(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRun {
    pub job: &'static str,
    pub summary: Result<String, String>,
}

/// Cron-driven runner. Each run is guarded by a lease in the job store, so several
/// instances can poll without running the same job twice.
pub struct JobScheduler {
    jobs: Arc<dyn JobRepository>,
    services: SettlementServices,
    definitions: Vec<JobDefinition>,
    lease: Duration,
}

impl JobScheduler {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        services: SettlementServices,
        definitions: Vec<JobDefinition>,
    ) -> Self {
        Self {
            jobs,
            services,
            definitions,
            lease: Duration::minutes(10),
        }
    }

    /// The standard job set; only the staleness sweep schedule is configurable.
    pub fn default_definitions(
        sweep_cron: &str,
    ) -> Result<Vec<JobDefinition>, cron::error::Error> {
        Ok(vec![
            JobDefinition::new(JobKind::StalenessSweep, sweep_cron)?,
            JobDefinition::new(JobKind::VirtualAccountExpiry, "0 * * * * *")?,
            JobDefinition::new(JobKind::EntitlementRetry, "*/30 * * * * *")?,
            JobDefinition::new(JobKind::ScheduledTransfers, "0 * * * * *")?,
        ])
    }

    pub async fn register(&self, now: DateTime<Utc>) -> Result<(), crate::ports::RepositoryError> {
        for definition in &self.definitions {
            self.jobs
                .ensure(definition.kind.name(), definition.next_after(now))
                .await?;
        }
        Ok(())
    }

    /// Run every job that is due and not leased elsewhere.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Vec<JobRun> {
        let mut runs = Vec::new();
        for definition in &self.definitions {
            let name = definition.kind.name();
            match self.jobs.claim(name, now, self.lease).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    error!(job = name, "failed to claim job: {}", e);
                    continue;
                }
            }

            debug!(job = name, "running scheduled job");
            let summary = self.execute(definition.kind, now).await;
            let next_due = definition.next_after(Utc::now().max(now));
            if let Err(e) = self
                .jobs
                .complete(name, now, next_due, summary.as_ref().err().cloned())
                .await
            {
                error!(job = name, "failed to record job completion: {}", e);
            }
            match &summary {
                Ok(text) => info!(job = name, %next_due, "job finished: {}", text),
                Err(e) => error!(job = name, %next_due, "job failed: {}", e),
            }
            runs.push(JobRun { job: name, summary });
        }
        runs
    }

    /// Run one job immediately, outside its schedule and without a lease.
    pub async fn run_now(&self, kind: JobKind, now: DateTime<Utc>) -> Result<String, String> {
        self.execute(kind, now).await
    }

    async fn execute(&self, kind: JobKind, now: DateTime<Utc>) -> Result<String, String> {
        let summarize = |value: serde_json::Result<String>| value.map_err(|e| e.to_string());
        match kind {
            JobKind::StalenessSweep => {
                let report = self
                    .services
                    .reconciliation
                    .sweep_stale(now)
                    .await
                    .map_err(|e| e.to_string())?;
                summarize(serde_json::to_string(&report))
            }
            JobKind::VirtualAccountExpiry => {
                let report = self
                    .services
                    .virtual_accounts
                    .expire_overdue(now)
                    .await
                    .map_err(|e| e.to_string())?;
                summarize(serde_json::to_string(&report))
            }
            JobKind::EntitlementRetry => {
                let report = self
                    .services
                    .entitlements
                    .dispatch_due(now)
                    .await
                    .map_err(|e| e.to_string())?;
                summarize(serde_json::to_string(&report))
            }
            JobKind::ScheduledTransfers => {
                let report = self
                    .services
                    .transfers
                    .dispatch_due(now)
                    .await
                    .map_err(|e| e.to_string())?;
                summarize(serde_json::to_string(&report))
            }
        }
    }

    /// Poll forever on a background task.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(jobs = self.definitions.len(), "job scheduler started");
            if let Err(e) = self.register(Utc::now()).await {
                error!("failed to register scheduled jobs: {}", e);
            }
            loop {
                self.run_due(Utc::now()).await;
                tokio::time::sleep(std::time::Duration::from_secs(POLL_INTERVAL_SECS)).await;
            }
        })
    }
}
