use clap::Parser;
use std::collections::HashMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settlement_core::cli::{self, Cli};
use settlement_core::config::{Config, LogFormat};
use settlement_core::secrets::SecretsManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let overrides = if SecretsManager::is_configured() {
        SecretsManager::new().await?.config_overrides().await?
    } else {
        HashMap::new()
    };
    let config = Config::from_env_with(&overrides)?;

    init_tracing(config.log_format);
    if !overrides.is_empty() {
        tracing::info!(keys = overrides.len(), "configuration secrets loaded from Vault");
    }

    cli::run(cli, config).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
