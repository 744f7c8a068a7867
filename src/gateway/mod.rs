//! Payment gateway boundary: the trait services depend on and its HTTP implementation.

pub mod client;
pub mod units;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Beneficiary, ObservedStatus};

pub use client::{GatewayClient, GatewayClientConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gateway error {code}: {message}")]
pub struct GatewayError {
    pub code: String,
    pub message: String,
    pub status: Option<u16>,
    transient: bool,
}

impl GatewayError {
    /// Outcome unknown: the gateway may or may not have acted.
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            transient: true,
        }
    }

    /// The gateway definitely refused the request.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
            transient: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::rejected("not_found", message)
    }

    pub fn circuit_open() -> Self {
        Self::transient("circuit_open", "gateway circuit breaker is open")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_not_found(&self) -> bool {
        self.code == "not_found"
    }

    /// Refused locally by the breaker; the request never left the process.
    pub fn is_circuit_open(&self) -> bool {
        self.code == "circuit_open"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAccountRequest {
    pub reference: String,
    pub user_id: Uuid,
    pub amount: i64,
    pub customer_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
    pub gateway_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub reference: String,
    pub email: String,
    pub amount: i64,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeInit {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub gateway_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub reference: String,
    pub amount: i64,
    pub beneficiary: Beneficiary,
    pub narration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAck {
    pub status: ObservedStatus,
    pub gateway_ref: Option<String>,
}

/// Normalised answer of every verify endpoint. Amounts are minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub reference: String,
    pub status: ObservedStatus,
    pub amount: Option<i64>,
    pub gateway_ref: Option<String>,
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountResolution {
    Resolved { account_name: String },
    UnsupportedBank,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_deposit_account(
        &self,
        request: &DepositAccountRequest,
    ) -> Result<DepositAccount, GatewayError>;

    async fn initialize_charge(&self, request: &ChargeRequest) -> Result<ChargeInit, GatewayError>;

    async fn transfer(&self, request: &TransferRequest) -> Result<TransferAck, GatewayError>;

    async fn verify_deposit(&self, reference: &str) -> Result<StatusReport, GatewayError>;

    async fn verify_charge(&self, reference: &str) -> Result<StatusReport, GatewayError>;

    async fn verify_transfer(&self, reference: &str) -> Result<StatusReport, GatewayError>;

    async fn resolve_account(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<AccountResolution, GatewayError>;
}

/// Map the gateway's status vocabulary onto the statuses the ledger understands.
pub fn parse_gateway_status(raw: &str) -> ObservedStatus {
    match raw.trim().to_lowercase().as_str() {
        "success" | "successful" | "completed" | "paid" => ObservedStatus::Success,
        "failed" | "declined" | "abandoned" | "cancelled" | "expired" => ObservedStatus::Failed,
        "reversed" | "refunded" => ObservedStatus::Reversed,
        "processing" | "queued" | "otp" | "sent" => ObservedStatus::Processing,
        _ => ObservedStatus::Pending,
    }
}
