use anyhow::{Context, Result};
use dotenvy::dotenv;
use ipnet::IpNet;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::domain::{FeeSchedule, TransferLimits};
use crate::gateway::units::{AmountUnit, GatewayUnits};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub allowed_ips: AllowedIps,
    pub trusted_proxy_depth: usize,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub webhook_processing_timeout_ms: u64,
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub gateway_timeout_secs: u64,
    pub gateway_units: GatewayUnits,
    pub amount_tolerance: i64,
    pub va_max_active: i64,
    pub va_min_duration_mins: i64,
    pub va_max_duration_mins: i64,
    pub transfer_limits: TransferLimits,
    pub fees: FeeSchedule,
    pub transfer_batch_max: usize,
    pub reconciliation_timeout_hours: i64,
    pub reconciliation_cron: String,
    pub entitlement_url: Option<String>,
    pub entitlement_secret: Option<String>,
    pub admin_api_key: Option<String>,
    pub log_format: LogFormat,
    pub log_request_body: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Environment with selected keys replaced, e.g. secrets fetched from Vault.
    pub fn from_env_with(overrides: &HashMap<String, String>) -> anyhow::Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| overrides.get(key).cloned().or_else(|| env::var(key).ok()))
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or_default = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());

        let storage = match or_default("STORAGE", "postgres").to_lowercase().as_str() {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => anyhow::bail!("STORAGE must be 'postgres' or 'memory', got '{other}'"),
        };
        let database_url = var("DATABASE_URL");
        if storage == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORAGE=postgres");
        }

        let defaults = TransferLimits::default();
        let default_fees = FeeSchedule::default();

        let config = Config {
            server_port: parse_var(&var, "SERVER_PORT", 3000)?,
            storage,
            database_url,
            redis_url: var("REDIS_URL"),
            allowed_ips: parse_allowed_ips(&or_default("ALLOWED_IPS", "*"))?,
            trusted_proxy_depth: parse_var(&var, "TRUSTED_PROXY_DEPTH", 1)?,
            webhook_secret: var("WEBHOOK_SECRET").context("WEBHOOK_SECRET is required")?,
            webhook_tolerance_secs: parse_var(&var, "WEBHOOK_TOLERANCE_SECS", 300)?,
            webhook_processing_timeout_ms: parse_var(&var, "WEBHOOK_PROCESSING_TIMEOUT_MS", 10_000)?,
            gateway_base_url: var("GATEWAY_BASE_URL").context("GATEWAY_BASE_URL is required")?,
            gateway_secret_key: var("GATEWAY_SECRET_KEY")
                .context("GATEWAY_SECRET_KEY is required")?,
            gateway_timeout_secs: parse_var(&var, "GATEWAY_TIMEOUT_SECS", 30)?,
            gateway_units: GatewayUnits {
                deposit: parse_var(&var, "GATEWAY_DEPOSIT_UNIT", AmountUnit::Minor)?,
                charge: parse_var(&var, "GATEWAY_CHARGE_UNIT", AmountUnit::Minor)?,
                transfer: parse_var(&var, "GATEWAY_TRANSFER_UNIT", AmountUnit::Minor)?,
                webhook: parse_var(&var, "GATEWAY_WEBHOOK_UNIT", AmountUnit::Minor)?,
            },
            amount_tolerance: parse_var(&var, "AMOUNT_TOLERANCE", 100)?,
            va_max_active: parse_var(&var, "VA_MAX_ACTIVE", 5)?,
            va_min_duration_mins: parse_var(&var, "VA_MIN_DURATION_MINS", 10)?,
            va_max_duration_mins: parse_var(&var, "VA_MAX_DURATION_MINS", 1440)?,
            transfer_limits: TransferLimits {
                min: parse_var(&var, "TRANSFER_MIN", defaults.min)?,
                max: parse_var(&var, "TRANSFER_MAX", defaults.max)?,
                daily: parse_var(&var, "TRANSFER_DAILY_LIMIT", defaults.daily)?,
                monthly: parse_var(&var, "TRANSFER_MONTHLY_LIMIT", defaults.monthly)?,
            },
            fees: FeeSchedule {
                fixed: parse_var(&var, "TRANSFER_FEE_FIXED", default_fees.fixed)?,
                bps: parse_var(&var, "TRANSFER_FEE_BPS", default_fees.bps)?,
            },
            transfer_batch_max: parse_var(&var, "TRANSFER_BATCH_MAX", 100)?,
            reconciliation_timeout_hours: parse_var(&var, "RECONCILIATION_TIMEOUT_HOURS", 24)?,
            reconciliation_cron: or_default("RECONCILIATION_CRON", "0 */15 * * * *"),
            entitlement_url: var("ENTITLEMENT_URL"),
            entitlement_secret: var("ENTITLEMENT_SECRET"),
            admin_api_key: var("ADMIN_API_KEY"),
            log_format: match or_default("LOG_FORMAT", "text").to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            },
            log_request_body: parse_var(&var, "LOG_REQUEST_BODY", false)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        url::Url::parse(&self.gateway_base_url).context("GATEWAY_BASE_URL is not a valid URL")?;
        if let Some(entitlement_url) = &self.entitlement_url {
            url::Url::parse(entitlement_url).context("ENTITLEMENT_URL is not a valid URL")?;
        }
        if self.va_min_duration_mins <= 0 || self.va_min_duration_mins > self.va_max_duration_mins {
            anyhow::bail!("VA_MIN_DURATION_MINS must be positive and not above VA_MAX_DURATION_MINS");
        }
        if self.transfer_limits.min > self.transfer_limits.max {
            anyhow::bail!("TRANSFER_MIN must not exceed TRANSFER_MAX");
        }
        if self.transfer_batch_max == 0 {
            anyhow::bail!("TRANSFER_BATCH_MAX must be greater than 0");
        }
        cron::Schedule::from_str(&self.reconciliation_cron)
            .map_err(|e| anyhow::anyhow!("RECONCILIATION_CRON is invalid: {e}"))?;
        Ok(())
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} is invalid: {e}")),
        None => Ok(default),
    }
}

pub fn parse_allowed_ips(raw: &str) -> anyhow::Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            // bare addresses are accepted as single-host networks
            entry
                .parse::<IpNet>()
                .or_else(|_| entry.parse::<std::net::IpAddr>().map(IpNet::from))
                .map_err(|e| anyhow::anyhow!("invalid ALLOWED_IPS entry '{entry}': {e}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("STORAGE", "memory"),
            ("WEBHOOK_SECRET", "whsec"),
            ("GATEWAY_BASE_URL", "https://gateway.test"),
            ("GATEWAY_SECRET_KEY", "sk_test"),
        ])
    }

    fn load(vars: HashMap<&'static str, &'static str>) -> anyhow::Result<Config> {
        Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let config = load(base()).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.webhook_tolerance_secs, 300);
        assert_eq!(config.amount_tolerance, 100);
        assert_eq!(config.va_max_active, 5);
        assert_eq!(config.fees, FeeSchedule { fixed: 100, bps: 50 });
        assert_eq!(config.reconciliation_timeout_hours, 24);
        assert_eq!(config.allowed_ips, AllowedIps::Any);
        assert_eq!(config.gateway_units.transfer, AmountUnit::Minor);
    }

    #[test]
    fn postgres_requires_database_url() {
        let mut vars = base();
        vars.insert("STORAGE", "postgres");
        assert!(load(vars.clone()).is_err());

        vars.insert("DATABASE_URL", "postgres://localhost/settlement");
        assert!(load(vars).is_ok());
    }

    #[test]
    fn units_and_cidrs_parse() {
        let mut vars = base();
        vars.insert("GATEWAY_TRANSFER_UNIT", "major");
        vars.insert("ALLOWED_IPS", "52.31.139.75, 10.0.0.0/8");
        let config = load(vars).unwrap();
        assert_eq!(config.gateway_units.transfer, AmountUnit::Major);
        match config.allowed_ips {
            AllowedIps::Cidrs(cidrs) => assert_eq!(cidrs.len(), 2),
            AllowedIps::Any => panic!("expected cidrs"),
        }
    }

    #[test]
    fn bad_cron_is_rejected() {
        let mut vars = base();
        vars.insert("RECONCILIATION_CRON", "every minute");
        assert!(load(vars).is_err());
    }

    #[test]
    fn empty_allow_list_is_rejected() {
        assert!(parse_allowed_ips(" , ").is_err());
    }
}
