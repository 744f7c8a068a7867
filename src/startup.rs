use crate::adapters::RedisNonceStore;
use crate::config::{Config, StorageBackend};
use crate::gateway::{GatewayClient, GatewayClientConfig};
use crate::health::{GatewayChecker, HealthMonitor, PostgresChecker, RedisChecker};
use crate::services::entitlements::{HttpEntitlementSink, LoggingEntitlementSink};
use crate::services::scheduler::JobScheduler;
use crate::services::{EntitlementSink, Repositories, ServicePolicies, SettlementServices};
use crate::webhook::{MemoryNonceStore, NonceStore, WebhookAuthenticator};
use crate::AppState;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const ENTITLEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a running instance needs, wired once from configuration.
pub struct Runtime {
    pub state: AppState,
    pub scheduler: Arc<JobScheduler>,
    pub pool: Option<PgPool>,
}

pub async fn build_runtime(config: &Config) -> Result<Runtime> {
    let (repositories, pool) = match config.storage {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required when STORAGE=postgres")?;
            let pool = crate::db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            (Repositories::postgres(pool.clone()), Some(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; state is lost on restart");
            (Repositories::in_memory().0, None)
        }
    };

    let gateway = GatewayClient::new(GatewayClientConfig {
        timeout: Duration::from_secs(config.gateway_timeout_secs),
        units: config.gateway_units,
        ..GatewayClientConfig::new(&config.gateway_base_url, &config.gateway_secret_key)
    })
    .context("Failed to build gateway client")?;

    let sink: Arc<dyn EntitlementSink> = match &config.entitlement_url {
        Some(url) => Arc::new(
            HttpEntitlementSink::new(url, config.entitlement_secret.clone(), ENTITLEMENT_TIMEOUT)
                .context("Failed to build entitlement client")?,
        ),
        None => Arc::new(LoggingEntitlementSink),
    };

    let services = SettlementServices::new(
        repositories.clone(),
        Arc::new(gateway.clone()),
        sink,
        ServicePolicies::from_config(config),
    );

    let nonce_store: Arc<dyn NonceStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisNonceStore::new(url)?),
        None => Arc::new(MemoryNonceStore::new()),
    };
    let authenticator = Arc::new(WebhookAuthenticator::new(
        config.webhook_secret.as_bytes().to_vec(),
        config.allowed_ips.clone(),
        config.trusted_proxy_depth,
        config.webhook_tolerance_secs,
        nonce_store,
    ));

    let mut health = HealthMonitor::new();
    if let Some(pool) = &pool {
        health = health.with("postgres", true, Arc::new(PostgresChecker::new(pool.clone())));
    }
    if let Some(url) = &config.redis_url {
        health = health.with("redis", false, Arc::new(RedisChecker::new(url.clone())));
    }
    health = health.with("gateway", false, Arc::new(GatewayChecker::new(gateway)));

    let definitions = JobScheduler::default_definitions(&config.reconciliation_cron)
        .map_err(|e| anyhow::anyhow!("RECONCILIATION_CRON is invalid: {e}"))?;
    let scheduler = Arc::new(JobScheduler::new(
        repositories.jobs.clone(),
        services.clone(),
        definitions,
    ));

    Ok(Runtime {
        state: AppState::new(services, authenticator, health, config),
        scheduler,
        pool,
    })
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub redis: bool,
    pub gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.redis && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Redis Connectivity:    {}", status(self.redis));
        println!("Gateway Reachability:  {}", status(self.gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

/// Checks only what is configured: no database under memory storage, no Redis without a URL.
pub async fn validate_environment(config: &Config, pool: Option<&PgPool>) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        redis: true,
        gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Some(pool) = pool {
        if let Err(e) = validate_database(pool).await {
            report.database = false;
            report.errors.push(format!("Database: {}", e));
        }
    }

    if let Some(url) = &config.redis_url {
        if let Err(e) = validate_redis(url).await {
            report.redis = false;
            report.errors.push(format!("Redis: {}", e));
        }
    }

    if let Err(e) = validate_gateway(&config.gateway_base_url).await {
        report.gateway = false;
        report.errors.push(format!("Gateway: {}", e));
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.webhook_secret.len() < 16 {
        anyhow::bail!("WEBHOOK_SECRET should be at least 16 characters");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.admin_api_key.is_none() {
        anyhow::bail!("ADMIN_API_KEY is not set; admin routes will refuse every request");
    }
    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .context("Redis PING failed")?;

    Ok(())
}

/// Any HTTP answer counts; only connection failures are reported.
async fn validate_gateway(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(base_url)
        .send()
        .await
        .context("Failed to connect to gateway")?;

    if response.status().is_server_error() {
        anyhow::bail!("Gateway returned status: {}", response.status());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
    }

    #[tokio::test]
    async fn memory_runtime_builds_without_external_services() {
        let config = config(&[
            ("STORAGE", "memory"),
            ("WEBHOOK_SECRET", "whsec_0123456789abcdef"),
            ("GATEWAY_BASE_URL", "http://127.0.0.1:9"),
            ("GATEWAY_SECRET_KEY", "sk_test"),
        ]);
        let runtime = build_runtime(&config).await.unwrap();
        assert!(runtime.pool.is_none());
        assert_eq!(runtime.state.webhook_timeout, Duration::from_millis(10_000));
    }

    #[test]
    fn short_webhook_secret_fails_validation() {
        let config = config(&[
            ("STORAGE", "memory"),
            ("WEBHOOK_SECRET", "short"),
            ("GATEWAY_BASE_URL", "https://gateway.test"),
            ("GATEWAY_SECRET_KEY", "sk_test"),
            ("ADMIN_API_KEY", "admin"),
        ]);
        assert!(validate_env_vars(&config).is_err());
    }
}
