pub mod balance;
pub mod events;
pub mod statement;
pub mod transaction;
pub mod transfer;
pub mod virtual_account;

pub use balance::{Balance, BalanceEffect, BalanceError};
pub use events::{EntitlementJob, EntitlementJobStatus, ScheduledJob, SettlementEvent};
pub use statement::StatementEntry;
pub use transaction::{
    new_reference, AuditEntry, CardPaymentDetails, ChargebackDetails, DepositDetails,
    ObservedStatus, PaymentPurpose, RefundDetails, StateConflict, Transaction, TransactionDetails,
    TransactionStatus, TransactionType, TransferDetails, TransitionSource, VersionedDetails,
};
pub use transfer::{normalize_name, Beneficiary, FeeSchedule, TransferLimits};
pub use virtual_account::{VirtualAccount, VirtualAccountStatus};
