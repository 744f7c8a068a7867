//! Delivery of settlement events to the entitlement collaborator.
//!
//! Events are written to the outbox inside the ledger transition that produced them, then
//! delivered once inline. Anything that fails is picked up again by `dispatch_due` with
//! exponential backoff until it lands or is dead-lettered.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{EntitlementJob, SettlementEvent};
use crate::ports::{OutboxRepository, RepositoryError};
use crate::webhook::authenticator::sign;

pub const SIGNATURE_HEADER: &str = "x-settlement-signature";
pub const EVENT_HEADER: &str = "x-settlement-event";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Error)]
#[error("entitlement delivery failed: {0}")]
pub struct SinkError(pub String);

#[async_trait]
pub trait EntitlementSink: Send + Sync {
    /// `key` is stable across retries of the same event.
    async fn deliver(&self, key: &str, event: &SettlementEvent) -> Result<(), SinkError>;
}

/// Posts events as signed JSON to the entitlement service.
pub struct HttpEntitlementSink {
    client: Client,
    url: String,
    secret: Option<String>,
}

impl HttpEntitlementSink {
    pub fn new(
        url: impl Into<String>,
        secret: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            secret,
        })
    }
}

#[async_trait]
impl EntitlementSink for HttpEntitlementSink {
    async fn deliver(&self, key: &str, event: &SettlementEvent) -> Result<(), SinkError> {
        let body = serde_json::to_vec(event).map_err(|e| SinkError(e.to_string()))?;
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, event.name())
            .header(IDEMPOTENCY_HEADER, key);
        if let Some(secret) = &self.secret {
            let signature =
                sign(secret.as_bytes(), &body).map_err(|e| SinkError(e.to_string()))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SinkError(format!(
                "entitlement service answered {}",
                response.status()
            )))
        }
    }
}

/// Used when no entitlement service is configured.
pub struct LoggingEntitlementSink;

#[async_trait]
impl EntitlementSink for LoggingEntitlementSink {
    async fn deliver(&self, key: &str, event: &SettlementEvent) -> Result<(), SinkError> {
        tracing::info!(
            key,
            event = event.name(),
            reference = event.reference(),
            "entitlement event (no sink configured)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EntitlementPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// How long an inline delivery owns a fresh job before the retry loop may take it.
    pub lease: Duration,
    pub delivery_timeout: std::time::Duration,
    pub batch_size: i64,
}

impl Default for EntitlementPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::seconds(30),
            max_delay: Duration::hours(1),
            lease: Duration::minutes(2),
            delivery_timeout: std::time::Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    pub claimed: usize,
    pub delivered: usize,
    pub rescheduled: usize,
    pub dead: usize,
}

enum Delivery {
    Delivered,
    Rescheduled,
    Dead,
}

pub struct EntitlementDispatcher {
    outbox: Arc<dyn OutboxRepository>,
    sink: Arc<dyn EntitlementSink>,
    policy: EntitlementPolicy,
}

impl EntitlementDispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        sink: Arc<dyn EntitlementSink>,
        policy: EntitlementPolicy,
    ) -> Self {
        Self {
            outbox,
            sink,
            policy,
        }
    }

    /// Outbox row for an event produced at `now`, leased to the inline delivery.
    pub fn job_for(&self, event: SettlementEvent, now: DateTime<Utc>) -> EntitlementJob {
        EntitlementJob::new(event, now + self.policy.lease)
    }

    /// Best-effort delivery right after the ledger commit. Failures stay in the outbox.
    pub async fn deliver_now(&self, job: &EntitlementJob) {
        if let Err(e) = self.attempt(job, Utc::now()).await {
            tracing::error!(
                job_id = %job.id,
                reference = %job.reference,
                "failed to record entitlement delivery: {}",
                e
            );
        }
    }

    /// Retry every job whose lease has run out.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport, RepositoryError> {
        let jobs = self
            .outbox
            .claim_due(now, self.policy.lease, self.policy.batch_size)
            .await?;
        let mut report = DispatchReport {
            claimed: jobs.len(),
            ..DispatchReport::default()
        };
        for job in &jobs {
            match self.attempt(job, now).await? {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Rescheduled => report.rescheduled += 1,
                Delivery::Dead => report.dead += 1,
            }
        }
        if report.claimed > 0 {
            tracing::info!(
                claimed = report.claimed,
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                dead = report.dead,
                "entitlement retry pass finished"
            );
        }
        Ok(report)
    }

    pub async fn jobs_for_reference(
        &self,
        reference: &str,
    ) -> Result<Vec<EntitlementJob>, RepositoryError> {
        self.outbox.jobs_for_reference(reference).await
    }

    /// Delay before retry number `attempts`: `base * 2^(attempts-1)`, capped.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.policy.base_delay * 2i32.pow(exponent);
        delay.min(self.policy.max_delay)
    }

    async fn attempt(
        &self,
        job: &EntitlementJob,
        now: DateTime<Utc>,
    ) -> Result<Delivery, RepositoryError> {
        let attempts = job.attempts + 1;
        let key = job.id.to_string();
        let result = match tokio::time::timeout(
            self.policy.delivery_timeout,
            self.sink.deliver(&key, &job.event),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError("delivery timed out".to_string())),
        };

        match result {
            Ok(()) => {
                self.outbox.mark_delivered(job.id, attempts).await?;
                tracing::info!(
                    reference = %job.reference,
                    event = job.event.name(),
                    attempts,
                    "entitlement event delivered"
                );
                Ok(Delivery::Delivered)
            }
            Err(e) if attempts >= self.policy.max_attempts => {
                self.outbox.mark_dead(job.id, attempts, &e.0).await?;
                tracing::error!(
                    reference = %job.reference,
                    event = job.event.name(),
                    attempts,
                    "entitlement event dead-lettered: {}",
                    e
                );
                Ok(Delivery::Dead)
            }
            Err(e) => {
                let due_at = now + self.backoff(attempts);
                self.outbox.reschedule(job.id, attempts, due_at, &e.0).await?;
                tracing::warn!(
                    reference = %job.reference,
                    event = job.event.name(),
                    attempts,
                    %due_at,
                    "entitlement delivery failed, will retry: {}",
                    e
                );
                Ok(Delivery::Rescheduled)
            }
        }
    }
}
