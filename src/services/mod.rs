pub mod charges;
pub mod entitlements;
pub mod ledger;
pub mod reconciliation;
pub mod scheduler;
pub mod transfers;
pub mod virtual_accounts;

pub use charges::CardPayments;
pub use entitlements::{EntitlementDispatcher, EntitlementSink};
pub use ledger::{ApplyOutcome, LedgerError, NotificationInput, TransactionLedger};
pub use reconciliation::ReconciliationEngine;
pub use scheduler::JobScheduler;
pub use transfers::TransferEngine;
pub use virtual_accounts::VirtualAccountManager;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

use crate::adapters::memory::MemoryStore;
use crate::adapters::{
    PostgresJobRepository, PostgresLedgerRepository, PostgresVirtualAccountRepository,
};
use crate::domain::TransitionSource;
use crate::gateway::units::AmountUnit;
use crate::gateway::PaymentGateway;
use crate::ports::{JobRepository, LedgerRepository, OutboxRepository, VirtualAccountRepository};
use crate::webhook::payload::{AuthenticatedWebhook, EventFamily};
use entitlements::EntitlementPolicy;
use ledger::LedgerPolicy;
use reconciliation::ReconciliationPolicy;
use transfers::TransferPolicy;
use virtual_accounts::{VirtualAccountError, VirtualAccountPolicy};

/// Storage behind every service.
#[derive(Clone)]
pub struct Repositories {
    pub ledger: Arc<dyn LedgerRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub virtual_accounts: Arc<dyn VirtualAccountRepository>,
    pub jobs: Arc<dyn JobRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        let ledger = Arc::new(PostgresLedgerRepository::new(pool.clone()));
        Self {
            ledger: ledger.clone(),
            outbox: ledger,
            virtual_accounts: Arc::new(PostgresVirtualAccountRepository::new(pool.clone())),
            jobs: Arc::new(PostgresJobRepository::new(pool)),
        }
    }

    /// All ports over one in-memory store, returned alongside for seeding.
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let repos = Self {
            ledger: store.clone(),
            outbox: store.clone(),
            virtual_accounts: store.clone(),
            jobs: store.clone(),
        };
        (repos, store)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServicePolicies {
    pub ledger: LedgerPolicy,
    pub entitlements: EntitlementPolicy,
    pub virtual_accounts: VirtualAccountPolicy,
    pub transfers: TransferPolicy,
    pub reconciliation: ReconciliationPolicy,
}

impl ServicePolicies {
    pub fn from_config(config: &crate::config::Config) -> Self {
        let tolerance = config.amount_tolerance;
        Self {
            ledger: LedgerPolicy {
                amount_tolerance: tolerance,
                ..LedgerPolicy::default()
            },
            entitlements: EntitlementPolicy::default(),
            virtual_accounts: VirtualAccountPolicy {
                max_active: config.va_max_active,
                min_duration: chrono::Duration::minutes(config.va_min_duration_mins),
                max_duration: chrono::Duration::minutes(config.va_max_duration_mins),
                ..VirtualAccountPolicy::default()
            },
            transfers: TransferPolicy {
                limits: config.transfer_limits,
                fees: config.fees,
                batch_max: config.transfer_batch_max,
                ..TransferPolicy::default()
            },
            reconciliation: ReconciliationPolicy {
                timeout: chrono::Duration::hours(config.reconciliation_timeout_hours),
                amount_tolerance: tolerance,
                ..ReconciliationPolicy::default()
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("notification is not usable: {0}")]
    Payload(String),
    #[error("no transaction for account number {0}")]
    UnknownAccount(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    VirtualAccount(#[from] VirtualAccountError),
}

/// The settlement components wired over one set of repositories and one gateway.
#[derive(Clone)]
pub struct SettlementServices {
    pub repositories: Repositories,
    pub ledger: Arc<TransactionLedger>,
    pub entitlements: Arc<EntitlementDispatcher>,
    pub virtual_accounts: Arc<VirtualAccountManager>,
    pub transfers: Arc<TransferEngine>,
    pub charges: Arc<CardPayments>,
    pub reconciliation: Arc<ReconciliationEngine>,
}

impl SettlementServices {
    pub fn new(
        repositories: Repositories,
        gateway: Arc<dyn PaymentGateway>,
        sink: Arc<dyn EntitlementSink>,
        policies: ServicePolicies,
    ) -> Self {
        let entitlements = Arc::new(EntitlementDispatcher::new(
            repositories.outbox.clone(),
            sink,
            policies.entitlements,
        ));
        let ledger = Arc::new(TransactionLedger::new(
            repositories.ledger.clone(),
            entitlements.clone(),
            policies.ledger,
        ));
        let virtual_accounts = Arc::new(VirtualAccountManager::new(
            repositories.virtual_accounts.clone(),
            ledger.clone(),
            gateway.clone(),
            policies.virtual_accounts,
        ));
        let transfers = Arc::new(TransferEngine::new(
            ledger.clone(),
            repositories.ledger.clone(),
            gateway.clone(),
            policies.transfers,
        ));
        let charges = Arc::new(CardPayments::new(ledger.clone(), gateway.clone()));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            ledger.clone(),
            repositories.ledger.clone(),
            gateway,
            virtual_accounts.clone(),
            policies.reconciliation,
        ));

        Self {
            repositories,
            ledger,
            entitlements,
            virtual_accounts,
            transfers,
            charges,
            reconciliation,
        }
    }

    /// Route an authenticated webhook to the component that owns its transaction.
    pub async fn handle_webhook(
        &self,
        hook: &AuthenticatedWebhook,
        unit: AmountUnit,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, DispatchError> {
        let notification = hook.notification(unit).map_err(DispatchError::Payload)?;
        let input = NotificationInput::new(notification.status, TransitionSource::Webhook)
            .amount(notification.amount)
            .gateway_ref(notification.gateway_ref.clone())
            .sender_name(notification.sender_name.clone())
            .expect_kinds(notification.family.kinds());

        match notification.family {
            EventFamily::Deposit => {
                let reference = if notification.reference.is_empty() {
                    let account_number = notification.account_number.clone().unwrap_or_default();
                    self.virtual_accounts
                        .reference_for_account_number(&account_number)
                        .await?
                        .ok_or(DispatchError::UnknownAccount(account_number))?
                } else {
                    notification.reference.clone()
                };
                Ok(self
                    .virtual_accounts
                    .handle_notification(&reference, &input, now)
                    .await?)
            }
            EventFamily::Charge | EventFamily::Transfer => {
                if notification.reference.is_empty() {
                    return Err(DispatchError::Payload("data.reference is required".to_string()));
                }
                Ok(self
                    .ledger
                    .apply_notification(&notification.reference, &input, now)
                    .await?)
            }
        }
    }
}
