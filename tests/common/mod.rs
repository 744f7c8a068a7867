#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use settlement_core::adapters::memory::MemoryStore;
use settlement_core::domain::{
    BalanceEffect, Beneficiary, DepositDetails, ObservedStatus, PaymentPurpose, SettlementEvent,
    Transaction, TransitionSource,
};
use settlement_core::gateway::{
    AccountResolution, ChargeInit, ChargeRequest, DepositAccount, DepositAccountRequest,
    GatewayError, PaymentGateway, StatusReport, TransferAck, TransferRequest,
};
use settlement_core::ports::LedgerRepository;
use settlement_core::services::charges::ChargeInput;
use settlement_core::services::entitlements::SinkError;
use settlement_core::services::{
    EntitlementSink, Repositories, ServicePolicies, SettlementServices,
};

/// Scriptable gateway. Unscripted verifications answer `not_found`.
pub struct FakeGateway {
    transfer_ack: Mutex<Result<ObservedStatus, GatewayError>>,
    verify: Mutex<HashMap<String, Result<StatusReport, GatewayError>>>,
    deposit_error: Mutex<Option<GatewayError>>,
    accounts_issued: AtomicUsize,
    pub transfer_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            transfer_ack: Mutex::new(Ok(ObservedStatus::Processing)),
            verify: Mutex::new(HashMap::new()),
            deposit_error: Mutex::new(None),
            accounts_issued: AtomicUsize::new(0),
            transfer_calls: AtomicUsize::new(0),
        }
    }

    pub fn ack_transfers_with(&self, ack: Result<ObservedStatus, GatewayError>) {
        *self.transfer_ack.lock().unwrap() = ack;
    }

    pub fn answer_verify(&self, reference: &str, status: ObservedStatus, amount: Option<i64>) {
        self.verify.lock().unwrap().insert(
            reference.to_string(),
            Ok(StatusReport {
                reference: reference.to_string(),
                status,
                amount,
                gateway_ref: Some(format!("GW_{reference}")),
                sender_name: None,
            }),
        );
    }

    pub fn fail_verify(&self, reference: &str, error: GatewayError) {
        self.verify
            .lock()
            .unwrap()
            .insert(reference.to_string(), Err(error));
    }

    pub fn fail_deposit_accounts(&self, error: GatewayError) {
        *self.deposit_error.lock().unwrap() = Some(error);
    }

    fn report(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        self.verify
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .unwrap_or_else(|| Err(GatewayError::not_found(format!("{reference} not found"))))
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_deposit_account(
        &self,
        request: &DepositAccountRequest,
    ) -> Result<DepositAccount, GatewayError> {
        if let Some(error) = self.deposit_error.lock().unwrap().clone() {
            return Err(error);
        }
        let n = self.accounts_issued.fetch_add(1, Ordering::SeqCst);
        Ok(DepositAccount {
            account_number: format!("99{:08}", n),
            account_name: request.customer_name.clone(),
            bank_name: "Test Bank".to_string(),
            gateway_ref: Some(format!("GW_{}", request.reference)),
        })
    }

    async fn initialize_charge(&self, request: &ChargeRequest) -> Result<ChargeInit, GatewayError> {
        Ok(ChargeInit {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: Some("ac_test".to_string()),
            gateway_ref: Some(format!("GW_{}", request.reference)),
        })
    }

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferAck, GatewayError> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let ack = self.transfer_ack.lock().unwrap().clone();
        ack.map(|status| TransferAck {
            status,
            gateway_ref: Some(format!("GW_{}", request.reference)),
        })
    }

    async fn verify_deposit(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        self.report(reference)
    }

    async fn verify_charge(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        self.report(reference)
    }

    async fn verify_transfer(&self, reference: &str) -> Result<StatusReport, GatewayError> {
        self.report(reference)
    }

    async fn resolve_account(
        &self,
        _account_number: &str,
        _bank_code: &str,
    ) -> Result<AccountResolution, GatewayError> {
        Ok(AccountResolution::Resolved {
            account_name: "Ada Obi".to_string(),
        })
    }
}

/// Records every delivered event; can be told to fail.
#[derive(Default)]
pub struct CountingSink {
    delivered: Mutex<Vec<(String, SettlementEvent)>>,
    failing: AtomicBool,
}

impl CountingSink {
    pub fn count(&self, name: &str) -> usize {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event)| event.name() == name)
            .count()
    }

    pub fn total(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntitlementSink for CountingSink {
    async fn deliver(&self, key: &str, event: &SettlementEvent) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError("entitlement service unavailable".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((key.to_string(), event.clone()));
        Ok(())
    }
}

pub struct Harness {
    pub services: SettlementServices,
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<CountingSink>,
}

pub fn harness() -> Harness {
    let (repositories, store) = Repositories::in_memory();
    let gateway = Arc::new(FakeGateway::new());
    let sink = Arc::new(CountingSink::default());
    let services = SettlementServices::new(
        repositories,
        gateway.clone(),
        sink.clone(),
        ServicePolicies::default(),
    );
    Harness {
        services,
        store,
        gateway,
        sink,
    }
}

impl Harness {
    /// A pending wallet top-up deposit recorded straight into the ledger.
    pub async fn seed_deposit(
        &self,
        reference: &str,
        user_id: Uuid,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Transaction {
        self.seed_payment(reference, user_id, amount, PaymentPurpose::WalletTopUp, created_at)
            .await
    }

    pub async fn seed_payment(
        &self,
        reference: &str,
        user_id: Uuid,
        amount: i64,
        purpose: PaymentPurpose,
        created_at: DateTime<Utc>,
    ) -> Transaction {
        let tx = Transaction::deposit(
            reference.to_string(),
            user_id,
            amount,
            DepositDetails {
                virtual_account_number: None,
                sender_name: None,
                purpose,
            },
        )
        .created_at(created_at);
        self.services
            .ledger
            .record(&tx, BalanceEffect::None, TransitionSource::Initiation)
            .await
            .unwrap()
    }

    /// A card payment taken through checkout and confirmed by the gateway.
    pub async fn settled_charge(
        &self,
        user_id: Uuid,
        amount: i64,
        purpose: PaymentPurpose,
        now: DateTime<Utc>,
    ) -> Transaction {
        let session = self
            .services
            .charges
            .initialize(
                ChargeInput {
                    user_id,
                    amount,
                    email: "ada@example.com".to_string(),
                    purpose,
                    callback_url: None,
                },
                now,
            )
            .await
            .unwrap();
        let reference = session.transaction.reference;
        self.gateway
            .answer_verify(&reference, ObservedStatus::Success, Some(amount));
        self.services
            .charges
            .verify(&reference, now)
            .await
            .unwrap()
            .transaction()
            .clone()
    }

    pub async fn available(&self, user_id: Uuid) -> i64 {
        self.services
            .repositories
            .ledger
            .balance(user_id)
            .await
            .unwrap()
            .available
    }

    pub async fn locked(&self, user_id: Uuid) -> i64 {
        self.services
            .repositories
            .ledger
            .balance(user_id)
            .await
            .unwrap()
            .locked
    }
}

pub fn beneficiary() -> Beneficiary {
    Beneficiary {
        account_number: "0123456789".to_string(),
        bank_code: "058".to_string(),
        account_name: "Ada Obi".to_string(),
    }
}
