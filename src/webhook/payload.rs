//! Webhook body shape and its translation into a ledger notification.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{ObservedStatus, TransactionType};
use crate::gateway::units::AmountUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Deposit,
    Charge,
    Transfer,
}

impl EventFamily {
    /// Transaction kinds an event of this family may settle.
    pub fn kinds(&self) -> &'static [TransactionType] {
        match self {
            EventFamily::Deposit => &[TransactionType::Deposit],
            EventFamily::Charge => &[TransactionType::CardPayment],
            EventFamily::Transfer => &[TransactionType::Transfer, TransactionType::Withdrawal],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DepositSuccess,
    DepositFailed,
    ChargeSuccess,
    ChargeFailed,
    TransferSuccess,
    TransferFailed,
    TransferReversed,
}

impl EventKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "deposit.success" => Some(EventKind::DepositSuccess),
            "deposit.failed" => Some(EventKind::DepositFailed),
            "charge.success" => Some(EventKind::ChargeSuccess),
            "charge.failed" => Some(EventKind::ChargeFailed),
            "transfer.success" => Some(EventKind::TransferSuccess),
            "transfer.failed" => Some(EventKind::TransferFailed),
            "transfer.reversed" => Some(EventKind::TransferReversed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DepositSuccess => "deposit.success",
            EventKind::DepositFailed => "deposit.failed",
            EventKind::ChargeSuccess => "charge.success",
            EventKind::ChargeFailed => "charge.failed",
            EventKind::TransferSuccess => "transfer.success",
            EventKind::TransferFailed => "transfer.failed",
            EventKind::TransferReversed => "transfer.reversed",
        }
    }

    pub fn family(&self) -> EventFamily {
        match self {
            EventKind::DepositSuccess | EventKind::DepositFailed => EventFamily::Deposit,
            EventKind::ChargeSuccess | EventKind::ChargeFailed => EventFamily::Charge,
            EventKind::TransferSuccess | EventKind::TransferFailed | EventKind::TransferReversed => {
                EventFamily::Transfer
            }
        }
    }

    pub fn observed(&self) -> ObservedStatus {
        match self {
            EventKind::DepositSuccess | EventKind::ChargeSuccess | EventKind::TransferSuccess => {
                ObservedStatus::Success
            }
            EventKind::DepositFailed | EventKind::ChargeFailed | EventKind::TransferFailed => {
                ObservedStatus::Failed
            }
            EventKind::TransferReversed => ObservedStatus::Reversed,
        }
    }
}

/// Body that passed every authentication check.
#[derive(Debug, Clone)]
pub struct AuthenticatedWebhook {
    pub event: EventKind,
    pub data: Map<String, Value>,
    pub nonce: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawEnvelope {
    pub event: Option<String>,
    pub data: Option<Value>,
}

/// What the gateway says happened to one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub family: EventFamily,
    pub reference: String,
    pub status: ObservedStatus,
    pub amount: Option<i64>,
    pub gateway_ref: Option<String>,
    pub sender_name: Option<String>,
    pub account_number: Option<String>,
}

fn field<'a>(data: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| data.get(*name))
        .filter(|value| !value.is_null())
}

fn text(data: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(data, names).and_then(|value| match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

impl AuthenticatedWebhook {
    /// Extract the notification. Deposit events may identify the account number instead of
    /// the reference; the caller resolves that case.
    pub fn notification(&self, unit: AmountUnit) -> Result<Notification, String> {
        let reference = text(&self.data, &["reference", "tx_ref"]).unwrap_or_default();
        let account_number = text(&self.data, &["accountNumber", "account_number"]);
        if reference.is_empty() && account_number.is_none() {
            return Err("data.reference is required".to_string());
        }
        let amount = field(&self.data, &["amount"])
            .map(|value| unit.from_gateway(value))
            .transpose()
            .map_err(|e| e.to_string())?;

        Ok(Notification {
            family: self.event.family(),
            reference,
            status: self.event.observed(),
            amount,
            gateway_ref: text(&self.data, &["id", "gatewayRef", "gateway_ref"]),
            sender_name: text(&self.data, &["senderName", "sender_name"]),
            account_number,
        })
    }
}
