use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

use crate::config::{Config, StorageBackend};
use crate::domain::TransactionType;
use crate::gateway::units::AmountUnit;
use crate::services::reconciliation::parse_statement_csv;
use crate::services::scheduler::JobKind;
use crate::startup::{build_runtime, validate_environment, Runtime};

#[derive(Parser)]
#[command(name = "settlement-core")]
#[command(about = "Settlement Core - payment notification and ledger service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and job scheduler (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Reconciliation commands
    #[command(subcommand)]
    Reconcile(ReconcileCommands),

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Scheduled job commands
    #[command(subcommand)]
    Jobs(JobCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// Re-poll or time out transactions stuck past the reconciliation timeout
    Stale,

    /// Match open transfers against a CSV bank statement
    Statement {
        /// CSV with an accountNumber,amount,name,date,reference header
        #[arg(value_name = "CSV")]
        path: PathBuf,

        /// Unit of the amount column
        #[arg(long, value_enum, default_value = "major")]
        unit: UnitArg,
    },
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Show a transaction and its audit trail
    Show {
        #[arg(value_name = "REFERENCE")]
        reference: String,
    },

    /// Accept or reject a transaction parked in mismatch
    ReviewMismatch {
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// Accept the received amount; without it the transaction is failed
        #[arg(long)]
        accept: bool,

        #[arg(long)]
        note: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum JobCommands {
    /// Run one job immediately, outside its schedule
    Run {
        #[arg(value_enum)]
        job: JobArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UnitArg {
    Minor,
    Major,
}

impl From<UnitArg> for AmountUnit {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Minor => AmountUnit::Minor,
            UnitArg::Major => AmountUnit::Major,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JobArg {
    StalenessSweep,
    VirtualAccountExpiry,
    EntitlementRetry,
    ScheduledTransfers,
}

impl From<JobArg> for JobKind {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::StalenessSweep => JobKind::StalenessSweep,
            JobArg::VirtualAccountExpiry => JobKind::VirtualAccountExpiry,
            JobArg::EntitlementRetry => JobKind::EntitlementRetry,
            JobArg::ScheduledTransfers => JobKind::ScheduledTransfers,
        }
    }
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => handle_serve(&config).await,
        Commands::Db(DbCommands::Migrate) => handle_db_migrate(&config).await,
        Commands::Config => handle_config_validate(&config).await,
        Commands::Reconcile(command) => {
            let runtime = build_runtime(&config).await?;
            match command {
                ReconcileCommands::Stale => handle_reconcile_stale(&runtime).await,
                ReconcileCommands::Statement { path, unit } => {
                    handle_reconcile_statement(&runtime, &path, unit.into()).await
                }
            }
        }
        Commands::Tx(command) => {
            let runtime = build_runtime(&config).await?;
            match command {
                TxCommands::Show { reference } => handle_tx_show(&runtime, &reference).await,
                TxCommands::ReviewMismatch {
                    reference,
                    accept,
                    note,
                } => handle_tx_review(&runtime, &reference, accept, note).await,
            }
        }
        Commands::Jobs(JobCommands::Run { job }) => {
            let runtime = build_runtime(&config).await?;
            handle_job_run(&runtime, job.into()).await
        }
    }
}

pub async fn handle_serve(config: &Config) -> anyhow::Result<()> {
    let runtime = build_runtime(config).await?;
    if let Some(pool) = &runtime.pool {
        crate::db::run_migrations(pool).await?;
    }

    let scheduler = runtime.scheduler.clone().start();
    let app = crate::create_app(runtime.state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;

    scheduler.abort();
    served?;
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required for migrations"))?;
    let pool = crate::db::create_pool(url).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Storage: {:?}", config.storage);
    if let Some(url) = &config.database_url {
        println!("  Database URL: {}", mask_password(url));
    }
    println!("  Gateway URL: {}", config.gateway_base_url);
    println!(
        "  Transfer fee: {} + {} bps",
        config.fees.fixed, config.fees.bps
    );
    println!(
        "  Reconciliation: {}h timeout, cron '{}'",
        config.reconciliation_timeout_hours, config.reconciliation_cron
    );

    let pool = match (config.storage, &config.database_url) {
        (StorageBackend::Postgres, Some(url)) => crate::db::create_pool(url).await.ok(),
        _ => None,
    };
    let report = validate_environment(config, pool.as_ref()).await;
    report.print();

    if report.is_valid() {
        tracing::info!("Configuration is valid");
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

pub async fn handle_reconcile_stale(runtime: &Runtime) -> anyhow::Result<()> {
    let report = runtime
        .state
        .services
        .reconciliation
        .sweep_stale(Utc::now())
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn handle_reconcile_statement(
    runtime: &Runtime,
    path: &Path,
    unit: AmountUnit,
) -> anyhow::Result<()> {
    let file = File::open(path)
        .map_err(|e| anyhow::anyhow!("cannot open {}: {}", path.display(), e))?;
    let entries = parse_statement_csv(file, unit)?;
    tracing::info!(entries = entries.len(), "statement loaded");

    let report = runtime
        .state
        .services
        .reconciliation
        .reconcile_statement(&entries, Utc::now())
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn handle_tx_show(runtime: &Runtime, reference: &str) -> anyhow::Result<()> {
    let (tx, trail) = runtime.state.services.ledger.history(reference).await?;

    println!("{} {} {}", tx.reference, tx.kind, tx.status);
    println!("  amount:   {}", tx.amount);
    println!("  total:    {}", tx.total_amount());
    if let Some(received) = tx.received_amount {
        println!("  received: {}", received);
    }
    if let Some(reason) = &tx.failure_reason {
        println!("  reason:   {}", reason);
    }
    println!("  audit:");
    for entry in trail {
        println!(
            "    {} {} -> {} ({}){}",
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.from_status.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
            entry.to_status,
            entry.source,
            entry
                .reason
                .map(|reason| format!(": {reason}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn handle_tx_review(
    runtime: &Runtime,
    reference: &str,
    accept: bool,
    note: Option<String>,
) -> anyhow::Result<()> {
    let services = &runtime.state.services;
    let now = Utc::now();
    let tx = services.ledger.get(reference).await?;
    if tx.kind == TransactionType::Deposit {
        services
            .virtual_accounts
            .review_mismatch(reference, accept, note, now)
            .await?;
    } else {
        services
            .ledger
            .review_mismatch(reference, accept, note, now)
            .await?;
    }

    let tx = services.ledger.get(reference).await?;
    tracing::info!(reference, status = %tx.status, "mismatch reviewed");
    println!("✓ Transaction {} is now {}", reference, tx.status);
    Ok(())
}

pub async fn handle_job_run(runtime: &Runtime, kind: JobKind) -> anyhow::Result<()> {
    match runtime.scheduler.run_now(kind, Utc::now()).await {
        Ok(summary) => {
            println!("✓ {}: {}", kind.name(), summary);
            Ok(())
        }
        Err(e) => anyhow::bail!("{} failed: {}", kind.name(), e),
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_database_password() {
        assert_eq!(
            mask_password("postgres://settle:hunter2@db:5432/settlement"),
            "postgres://settle:****@db:5432/settlement"
        );
        assert_eq!(mask_password("postgres://db/settlement"), "postgres://db/settlement");
    }

    #[test]
    fn parses_statement_command() {
        let cli = Cli::try_parse_from([
            "settlement-core",
            "reconcile",
            "statement",
            "march.csv",
            "--unit",
            "minor",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Reconcile(ReconcileCommands::Statement { path, unit })) => {
                assert_eq!(path, PathBuf::from("march.csv"));
                assert!(matches!(unit, UnitArg::Minor));
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn parses_review_command() {
        let cli = Cli::try_parse_from([
            "settlement-core",
            "tx",
            "review-mismatch",
            "DVA_1",
            "--accept",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Tx(TxCommands::ReviewMismatch { accept: true, .. }))
        ));
    }
}
