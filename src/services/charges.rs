//! Hosted card checkout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    new_reference, BalanceEffect, CardPaymentDetails, PaymentPurpose, Transaction,
    TransactionType, TransitionSource,
};
use crate::gateway::{ChargeRequest, GatewayError, PaymentGateway};
use crate::services::ledger::{ApplyOutcome, LedgerError, NotificationInput, TransactionLedger};
use crate::validation::{validate_email, validate_positive_amount, ValidationError};

#[derive(Debug, Error)]
pub enum ChargeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("charge {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone)]
pub struct ChargeInput {
    pub user_id: Uuid,
    pub amount: i64,
    pub email: String,
    pub purpose: PaymentPurpose,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeSession {
    pub transaction: Transaction,
    pub authorization_url: String,
    pub access_code: Option<String>,
}

pub struct CardPayments {
    ledger: Arc<TransactionLedger>,
    gateway: Arc<dyn PaymentGateway>,
}

impl CardPayments {
    pub fn new(ledger: Arc<TransactionLedger>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { ledger, gateway }
    }

    /// Open a checkout session and record the pending card payment behind it.
    ///
    /// No money moves until the payer completes checkout, so the session is opened first
    /// and the ledger row carries its authorization URL.
    pub async fn initialize(
        &self,
        input: ChargeInput,
        now: DateTime<Utc>,
    ) -> Result<ChargeSession, ChargeError> {
        validate_positive_amount(input.amount)?;
        validate_email(&input.email)?;

        let reference = new_reference("CHG");
        let init = self
            .gateway
            .initialize_charge(&ChargeRequest {
                reference: reference.clone(),
                email: input.email.trim().to_string(),
                amount: input.amount,
                callback_url: input.callback_url,
            })
            .await?;

        let mut tx = Transaction::card_payment(
            reference,
            input.user_id,
            input.amount,
            CardPaymentDetails {
                email: input.email.trim().to_string(),
                authorization_url: Some(init.authorization_url.clone()),
                purpose: input.purpose,
            },
        )
        .created_at(now);
        tx.gateway_ref = init.gateway_ref;
        let transaction = self
            .ledger
            .record(&tx, BalanceEffect::None, TransitionSource::Initiation)
            .await?;

        Ok(ChargeSession {
            transaction,
            authorization_url: init.authorization_url,
            access_code: init.access_code,
        })
    }

    /// Ask the gateway how a charge ended and apply the answer.
    pub async fn verify(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, ChargeError> {
        let tx = self.ledger.get(reference).await?;
        if tx.kind != TransactionType::CardPayment {
            return Err(ChargeError::NotFound(reference.to_string()));
        }
        if !tx.status.is_open() {
            return Ok(ApplyOutcome::AlreadyApplied(tx));
        }

        let report = self.gateway.verify_charge(reference).await?;
        let input = NotificationInput::new(report.status, TransitionSource::Poll)
            .amount(report.amount)
            .gateway_ref(report.gateway_ref);
        Ok(self.ledger.apply_notification(reference, &input, now).await?)
    }
}
