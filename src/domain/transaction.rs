//! Transaction domain entity.
//! Framework-agnostic representation of a money movement and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::transfer::Beneficiary;

/// Version stamped on every persisted `TransactionDetails` payload.
pub const DETAILS_SCHEMA_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
    CardPayment,
    Refund,
    EscrowHold,
    EscrowRelease,
    Commission,
    Bonus,
    Chargeback,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::CardPayment => "card_payment",
            TransactionType::Refund => "refund",
            TransactionType::EscrowHold => "escrow_hold",
            TransactionType::EscrowRelease => "escrow_release",
            TransactionType::Commission => "commission",
            TransactionType::Bonus => "bonus",
            TransactionType::Chargeback => "chargeback",
        }
    }

    /// Outbound types hold a balance lock while in flight.
    pub fn is_outbound(&self) -> bool {
        matches!(self, TransactionType::Transfer | TransactionType::Withdrawal)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" => Ok(TransactionType::Withdrawal),
            "transfer" => Ok(TransactionType::Transfer),
            "card_payment" => Ok(TransactionType::CardPayment),
            "refund" => Ok(TransactionType::Refund),
            "escrow_hold" => Ok(TransactionType::EscrowHold),
            "escrow_release" => Ok(TransactionType::EscrowRelease),
            "commission" => Ok(TransactionType::Commission),
            "bonus" => Ok(TransactionType::Bonus),
            "chargeback" => Ok(TransactionType::Chargeback),
            other => Err(format!("unknown transaction type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Scheduled,
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Refunded,
    Expired,
    PartiallyRefunded,
    Disputed,
    Mismatch,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Scheduled => "scheduled",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Expired => "expired",
            TransactionStatus::PartiallyRefunded => "partially_refunded",
            TransactionStatus::Disputed => "disputed",
            TransactionStatus::Mismatch => "mismatch",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::Failed
                | TransactionStatus::Cancelled
                | TransactionStatus::Refunded
                | TransactionStatus::Expired
        )
    }

    /// Still waiting on an outcome from the gateway (or the scheduler).
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Scheduled | TransactionStatus::Pending | TransactionStatus::Processing
        )
    }

    /// The payment behind this status went through, whatever happened afterwards.
    pub fn is_settled_success(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success
                | TransactionStatus::PartiallyRefunded
                | TransactionStatus::Refunded
                | TransactionStatus::Disputed
        )
    }

    pub fn is_settled_failure(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed | TransactionStatus::Cancelled | TransactionStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match self {
            Scheduled => matches!(next, Pending | Cancelled),
            Pending => matches!(
                next,
                Processing | Success | Failed | Cancelled | Expired | Mismatch
            ),
            Processing => matches!(next, Success | Failed | Expired | Mismatch),
            Success => matches!(next, Refunded | PartiallyRefunded | Disputed),
            PartiallyRefunded => matches!(next, PartiallyRefunded | Refunded | Disputed),
            Disputed => matches!(next, Success | PartiallyRefunded | Refunded),
            Mismatch => matches!(next, Success | Failed),
            Failed | Cancelled | Refunded | Expired => false,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(TransactionStatus::Scheduled),
            "pending" => Ok(TransactionStatus::Pending),
            "processing" => Ok(TransactionStatus::Processing),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "refunded" => Ok(TransactionStatus::Refunded),
            "expired" => Ok(TransactionStatus::Expired),
            "partially_refunded" => Ok(TransactionStatus::PartiallyRefunded),
            "disputed" => Ok(TransactionStatus::Disputed),
            "mismatch" => Ok(TransactionStatus::Mismatch),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Where a state change originated; recorded on every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionSource {
    Initiation,
    User,
    Webhook,
    Poll,
    Reconciliation,
    Scheduler,
    Manual,
}

impl TransitionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionSource::Initiation => "initiation",
            TransitionSource::User => "user",
            TransitionSource::Webhook => "webhook",
            TransitionSource::Poll => "poll",
            TransitionSource::Reconciliation => "reconciliation",
            TransitionSource::Scheduler => "scheduler",
            TransitionSource::Manual => "manual",
        }
    }
}

impl fmt::Display for TransitionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiation" => Ok(TransitionSource::Initiation),
            "user" => Ok(TransitionSource::User),
            "webhook" => Ok(TransitionSource::Webhook),
            "poll" => Ok(TransitionSource::Poll),
            "reconciliation" => Ok(TransitionSource::Reconciliation),
            "scheduler" => Ok(TransitionSource::Scheduler),
            "manual" => Ok(TransitionSource::Manual),
            other => Err(format!("unknown transition source: {other}")),
        }
    }
}

/// Status as reported by the gateway, before the ledger interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Reversed,
}

impl ObservedStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            ObservedStatus::Success | ObservedStatus::Failed | ObservedStatus::Reversed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservedStatus::Pending => "pending",
            ObservedStatus::Processing => "processing",
            ObservedStatus::Success => "success",
            ObservedStatus::Failed => "failed",
            ObservedStatus::Reversed => "reversed",
        }
    }
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObservedStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ObservedStatus::Pending),
            "processing" => Ok(ObservedStatus::Processing),
            "success" => Ok(ObservedStatus::Success),
            "failed" => Ok(ObservedStatus::Failed),
            "reversed" => Ok(ObservedStatus::Reversed),
            other => Err(format!("unknown observed status: {other}")),
        }
    }
}

/// What a confirmed inbound payment buys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPurpose {
    WalletTopUp,
    PremiumUpgrade { solution_id: String },
    JobPosting { job_id: String, slots: u32 },
    MarketplaceSlot { listing_id: String },
    Subscription { plan: String, months: u32 },
}

impl PaymentPurpose {
    pub fn credits_wallet(&self) -> bool {
        matches!(self, PaymentPurpose::WalletTopUp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositDetails {
    pub virtual_account_number: Option<String>,
    pub sender_name: Option<String>,
    pub purpose: PaymentPurpose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPaymentDetails {
    pub email: String,
    pub authorization_url: Option<String>,
    pub purpose: PaymentPurpose,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub beneficiary: Beneficiary,
    pub fees: i64,
    pub total_amount: i64,
    pub retry_count: u32,
    pub retry_of: Option<Uuid>,
    pub batch_id: Option<Uuid>,
    pub beneficiary_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDetails {
    pub payment_id: Uuid,
    pub payment_reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargebackDetails {
    pub payment_id: Uuid,
    pub payment_reference: String,
}

/// Per-type metadata. Each transaction type maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionDetails {
    Deposit(DepositDetails),
    CardPayment(CardPaymentDetails),
    Transfer(TransferDetails),
    Refund(RefundDetails),
    Chargeback(ChargebackDetails),
    Plain { note: Option<String> },
}

impl TransactionDetails {
    pub fn fits(&self, kind: TransactionType) -> bool {
        match self {
            TransactionDetails::Deposit(_) => kind == TransactionType::Deposit,
            TransactionDetails::CardPayment(_) => kind == TransactionType::CardPayment,
            TransactionDetails::Transfer(_) => kind.is_outbound(),
            TransactionDetails::Refund(_) => kind == TransactionType::Refund,
            TransactionDetails::Chargeback(_) => kind == TransactionType::Chargeback,
            TransactionDetails::Plain { .. } => matches!(
                kind,
                TransactionType::EscrowHold
                    | TransactionType::EscrowRelease
                    | TransactionType::Commission
                    | TransactionType::Bonus
            ),
        }
    }
}

/// Stored form of the details column: the variant plus its schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedDetails {
    pub v: u16,
    #[serde(flatten)]
    pub details: TransactionDetails,
}

impl From<TransactionDetails> for VersionedDetails {
    fn from(details: TransactionDetails) -> Self {
        Self {
            v: DETAILS_SCHEMA_VERSION,
            details,
        }
    }
}

/// Domain entity representing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub user_id: Uuid,
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub amount: i64,
    pub received_amount: Option<i64>,
    pub refunded_amount: i64,
    pub balance_before: Option<i64>,
    pub balance_after: Option<i64>,
    pub gateway_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub details: TransactionDetails,
    pub version: i64,
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    fn new(
        reference: String,
        user_id: Uuid,
        kind: TransactionType,
        amount: i64,
        details: TransactionDetails,
    ) -> Self {
        debug_assert!(details.fits(kind));
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference,
            user_id,
            kind,
            status: TransactionStatus::Pending,
            amount,
            received_amount: None,
            refunded_amount: 0,
            balance_before: None,
            balance_after: None,
            gateway_ref: None,
            failure_reason: None,
            details,
            version: 0,
            due_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            settled_at: None,
        }
    }

    pub fn deposit(reference: String, user_id: Uuid, amount: i64, details: DepositDetails) -> Self {
        Self::new(
            reference,
            user_id,
            TransactionType::Deposit,
            amount,
            TransactionDetails::Deposit(details),
        )
    }

    pub fn card_payment(
        reference: String,
        user_id: Uuid,
        amount: i64,
        details: CardPaymentDetails,
    ) -> Self {
        Self::new(
            reference,
            user_id,
            TransactionType::CardPayment,
            amount,
            TransactionDetails::CardPayment(details),
        )
    }

    pub fn transfer(reference: String, user_id: Uuid, amount: i64, details: TransferDetails) -> Self {
        Self::new(
            reference,
            user_id,
            TransactionType::Transfer,
            amount,
            TransactionDetails::Transfer(details),
        )
    }

    /// Refunds are booked as already-settled children of the refunded payment.
    pub fn refund(reference: String, user_id: Uuid, amount: i64, details: RefundDetails) -> Self {
        let mut tx = Self::new(
            reference,
            user_id,
            TransactionType::Refund,
            amount,
            TransactionDetails::Refund(details),
        );
        tx.mark_settled();
        tx
    }

    pub fn chargeback(
        reference: String,
        user_id: Uuid,
        amount: i64,
        details: ChargebackDetails,
    ) -> Self {
        let mut tx = Self::new(
            reference,
            user_id,
            TransactionType::Chargeback,
            amount,
            TransactionDetails::Chargeback(details),
        );
        tx.mark_settled();
        tx
    }

    pub fn scheduled_for(mut self, due_at: DateTime<Utc>) -> Self {
        self.status = TransactionStatus::Scheduled;
        self.due_at = Some(due_at);
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    fn mark_settled(&mut self) {
        self.status = TransactionStatus::Success;
        self.received_amount = Some(self.amount);
        self.completed_at = Some(self.created_at);
        self.settled_at = Some(self.created_at);
    }

    /// Amount held against the user's balance while an outbound transaction is in flight.
    pub fn total_amount(&self) -> i64 {
        match &self.details {
            TransactionDetails::Transfer(details) => details.total_amount,
            _ => self.amount,
        }
    }

    pub fn purpose(&self) -> Option<&PaymentPurpose> {
        match &self.details {
            TransactionDetails::Deposit(details) => Some(&details.purpose),
            TransactionDetails::CardPayment(details) => Some(&details.purpose),
            _ => None,
        }
    }

    pub fn transfer_details(&self) -> Option<&TransferDetails> {
        match &self.details {
            TransactionDetails::Transfer(details) => Some(details),
            _ => None,
        }
    }

    /// Amount the gateway actually settled, falling back to the requested amount.
    pub fn settled_amount(&self) -> i64 {
        self.received_amount.unwrap_or(self.amount)
    }

    pub fn refundable_amount(&self) -> i64 {
        (self.settled_amount() - self.refunded_amount).max(0)
    }
}

/// One line of the per-transaction audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub reference: String,
    pub from_status: Option<TransactionStatus>,
    pub to_status: TransactionStatus,
    pub source: TransitionSource,
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A notification that disagreed with an already-final transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConflict {
    pub id: Uuid,
    pub reference: String,
    pub current_status: TransactionStatus,
    pub observed_status: ObservedStatus,
    pub source: TransitionSource,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Client-side idempotency reference, e.g. `TRF_3F9A...`.
pub fn new_reference(prefix: &str) -> String {
    format!(
        "{}_{}",
        prefix,
        Uuid::new_v4().simple().to_string().to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_only_allow_refund_paths() {
        use TransactionStatus::*;
        for terminal in [Failed, Cancelled, Refunded, Expired] {
            for next in [
                Scheduled, Pending, Processing, Success, Failed, Cancelled, Refunded, Expired,
                PartiallyRefunded, Disputed, Mismatch,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
        assert!(Success.can_transition_to(Refunded));
        assert!(Success.can_transition_to(PartiallyRefunded));
        assert!(!Success.can_transition_to(Failed));
        assert!(!Success.can_transition_to(Pending));
    }

    #[test]
    fn pending_flows_forward_only() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Success));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(Pending));
        assert!(!Scheduled.can_transition_to(Success));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TransactionStatus::PartiallyRefunded,
            TransactionStatus::Mismatch,
            TransactionStatus::Scheduled,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>(), Ok(status));
        }
        assert!("settled".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn details_carry_schema_version() {
        let details = TransactionDetails::Deposit(DepositDetails {
            virtual_account_number: Some("9900112233".to_string()),
            sender_name: None,
            purpose: PaymentPurpose::PremiumUpgrade {
                solution_id: "sol-1".to_string(),
            },
        });
        let stored = serde_json::to_value(VersionedDetails::from(details.clone())).unwrap();
        assert_eq!(stored["v"], 1);
        assert_eq!(stored["kind"], "deposit");
        assert_eq!(stored["purpose"]["kind"], "premium_upgrade");

        let back: VersionedDetails = serde_json::from_value(stored).unwrap();
        assert_eq!(back.details, details);
    }

    #[test]
    fn refund_children_start_settled() {
        let tx = Transaction::refund(
            new_reference("RFD"),
            Uuid::new_v4(),
            500,
            RefundDetails {
                payment_id: Uuid::new_v4(),
                payment_reference: "PAY_1".to_string(),
                reason: "duplicate".to_string(),
            },
        );
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.received_amount, Some(500));
        assert!(tx.reference.starts_with("RFD_"));
    }

    #[test]
    fn details_fit_their_type() {
        let plain = TransactionDetails::Plain { note: None };
        assert!(plain.fits(TransactionType::Bonus));
        assert!(!plain.fits(TransactionType::Deposit));
    }
}
