//! Settlement events handed to the entitlement collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::transaction::{PaymentPurpose, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    PaymentConfirmed {
        transaction_id: Uuid,
        reference: String,
        user_id: Uuid,
        amount: i64,
        purpose: PaymentPurpose,
    },
    TransferCompleted {
        transaction_id: Uuid,
        reference: String,
        user_id: Uuid,
        amount: i64,
    },
    TransferFailed {
        transaction_id: Uuid,
        reference: String,
        user_id: Uuid,
        reason: String,
    },
    RefundIssued {
        transaction_id: Uuid,
        reference: String,
        user_id: Uuid,
        payment_reference: String,
        amount: i64,
    },
}

impl SettlementEvent {
    pub fn reference(&self) -> &str {
        match self {
            SettlementEvent::PaymentConfirmed { reference, .. }
            | SettlementEvent::TransferCompleted { reference, .. }
            | SettlementEvent::TransferFailed { reference, .. }
            | SettlementEvent::RefundIssued { reference, .. } => reference,
        }
    }

    pub fn transaction_id(&self) -> Uuid {
        match self {
            SettlementEvent::PaymentConfirmed { transaction_id, .. }
            | SettlementEvent::TransferCompleted { transaction_id, .. }
            | SettlementEvent::TransferFailed { transaction_id, .. }
            | SettlementEvent::RefundIssued { transaction_id, .. } => *transaction_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::PaymentConfirmed { .. } => "payment_confirmed",
            SettlementEvent::TransferCompleted { .. } => "transfer_completed",
            SettlementEvent::TransferFailed { .. } => "transfer_failed",
            SettlementEvent::RefundIssued { .. } => "refund_issued",
        }
    }

    /// Event for an inbound payment that just reached `success`.
    pub fn payment_confirmed(tx: &Transaction, amount: i64) -> Option<Self> {
        tx.purpose().map(|purpose| SettlementEvent::PaymentConfirmed {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            user_id: tx.user_id,
            amount,
            purpose: purpose.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementJobStatus {
    Pending,
    Delivered,
    Dead,
}

impl EntitlementJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementJobStatus::Pending => "pending",
            EntitlementJobStatus::Delivered => "delivered",
            EntitlementJobStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for EntitlementJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementJobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntitlementJobStatus::Pending),
            "delivered" => Ok(EntitlementJobStatus::Delivered),
            "dead" => Ok(EntitlementJobStatus::Dead),
            other => Err(format!("unknown entitlement job status: {other}")),
        }
    }
}

/// Outbox row: written in the same unit of work as the ledger transition that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementJob {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub reference: String,
    pub event: SettlementEvent,
    pub attempts: u32,
    pub status: EntitlementJobStatus,
    pub due_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EntitlementJob {
    pub fn new(event: SettlementEvent, due_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: event.transaction_id(),
            reference: event.reference().to_string(),
            event,
            attempts: 0,
            status: EntitlementJobStatus::Pending,
            due_at,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

/// A persisted periodic job and its lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub name: String,
    pub due_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
