use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::gateway::GatewayClient;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.into(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e.to_string()),
        }
    }
}

pub struct RedisChecker {
    url: String,
}

impl RedisChecker {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        let client = match redis::Client::open(self.url.as_str()) {
            Ok(client) => client,
            Err(e) => return DependencyStatus::unhealthy(e.to_string()),
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => return DependencyStatus::unhealthy(e.to_string()),
        };
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e.to_string()),
        }
    }
}

/// Reports the gateway circuit breaker; an open circuit means calls are being refused.
pub struct GatewayChecker {
    client: GatewayClient,
}

impl GatewayChecker {
    pub fn new(client: GatewayClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependencyChecker for GatewayChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.client.circuit_state() {
            "closed" => DependencyStatus::healthy(start),
            state => DependencyStatus::unhealthy(format!("circuit {state}")),
        }
    }
}

#[derive(Clone)]
struct Registered {
    name: String,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// The dependency set reported by `GET /health`.
#[derive(Clone)]
pub struct HealthMonitor {
    checkers: Vec<Registered>,
    start_time: Instant,
    check_timeout: Duration,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
            start_time: Instant::now(),
            check_timeout: Duration::from_secs(5),
        }
    }

    /// Critical dependencies make the service unhealthy; others only degrade it.
    pub fn with(
        mut self,
        name: impl Into<String>,
        critical: bool,
        checker: Arc<dyn DependencyChecker>,
    ) -> Self {
        self.checkers.push(Registered {
            name: name.into(),
            critical,
            checker,
        });
        self
    }

    pub async fn check_health(&self) -> HealthResponse {
        let checks = self.checkers.iter().map(|registered| async move {
            let status = timeout(self.check_timeout, registered.checker.check())
                .await
                .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            (registered, status)
        });
        let results = futures::future::join_all(checks).await;

        let mut dependencies = HashMap::new();
        let mut has_critical_failure = false;
        let mut has_non_critical_failure = false;
        for (registered, status) in results {
            if matches!(status, DependencyStatus::Unhealthy { .. }) {
                if registered.critical {
                    has_critical_failure = true;
                } else {
                    has_non_critical_failure = true;
                }
            }
            dependencies.insert(registered.name.clone(), status);
        }

        HealthResponse {
            status: overall_status(has_critical_failure, has_non_critical_failure).to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dependencies,
        }
    }
}

fn overall_status(critical_failure: bool, non_critical_failure: bool) -> &'static str {
    if critical_failure {
        "unhealthy"
    } else if non_critical_failure {
        "degraded"
    } else {
        "healthy"
    }
}
