//! Reconciliation: closes transactions the webhook path never settled.
//!
//! Two passes. The staleness sweep asks the gateway about anything open past the timeout
//! and fails what it cannot resolve. Statement matching settles open transfers against
//! bank statement lines, each line claimed by at most one transfer.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    normalize_name, ObservedStatus, StatementEntry, Transaction, TransactionStatus,
    TransactionType, TransitionSource,
};
use crate::gateway::units::AmountUnit;
use crate::gateway::{GatewayError, PaymentGateway, StatusReport};
use crate::ports::{LedgerRepository, RepositoryError};
use crate::services::ledger::{
    ApplyOutcome, LedgerError, NotificationInput, TransactionLedger, TransitionContext,
};
use crate::services::virtual_accounts::VirtualAccountManager;

pub const TIMEOUT_REASON: &str = "timeout";

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("statement could not be read: {0}")]
    Statement(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationPolicy {
    pub timeout: Duration,
    pub amount_tolerance: i64,
    pub batch_size: i64,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::hours(24),
            amount_tolerance: 100,
            batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub examined: usize,
    /// Settled from a gateway answer.
    pub resolved: usize,
    /// Settled from a statement line.
    pub matched: usize,
    pub timed_out: usize,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

pub struct ReconciliationEngine {
    ledger: Arc<TransactionLedger>,
    repo: Arc<dyn LedgerRepository>,
    gateway: Arc<dyn PaymentGateway>,
    virtual_accounts: Arc<VirtualAccountManager>,
    policy: ReconciliationPolicy,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        repo: Arc<dyn LedgerRepository>,
        gateway: Arc<dyn PaymentGateway>,
        virtual_accounts: Arc<VirtualAccountManager>,
        policy: ReconciliationPolicy,
    ) -> Self {
        Self {
            ledger,
            repo,
            gateway,
            virtual_accounts,
            policy,
        }
    }

    /// Resolve or time out every transaction still open after the timeout.
    pub async fn sweep_stale(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let cutoff = now - self.policy.timeout;
        let stale = self.repo.find_stale(cutoff, self.policy.batch_size).await?;
        let mut report = ReconciliationReport {
            examined: stale.len(),
            ..ReconciliationReport::default()
        };

        for tx in stale {
            let answer = match self.verify(&tx).await {
                Some(Ok(answer)) => Some(answer),
                Some(Err(e)) if e.is_not_found() => None,
                Some(Err(e)) => {
                    // Unknown outcome: leave it for the next sweep rather than guess.
                    tracing::warn!(
                        reference = %tx.reference,
                        code = %e.code,
                        "gateway verification failed during sweep: {}",
                        e.message
                    );
                    report.errors.push(format!("{}: {}", tx.reference, e));
                    continue;
                }
                None => None,
            };

            let result = match answer {
                Some(answer) if answer.status.is_resolved() => {
                    let input = NotificationInput::new(answer.status, TransitionSource::Reconciliation)
                        .amount(answer.amount)
                        .gateway_ref(answer.gateway_ref)
                        .sender_name(answer.sender_name);
                    self.ledger
                        .apply_notification(&tx.reference, &input, now)
                        .await
                        .map(|outcome| (outcome, false))
                }
                _ => self
                    .ledger
                    .transition(
                        &tx.reference,
                        TransactionStatus::Failed,
                        TransitionContext::new(TransitionSource::Reconciliation)
                            .reason(TIMEOUT_REASON),
                        now,
                    )
                    .await
                    .map(|outcome| (outcome, true)),
            };

            match result {
                Ok((outcome, timed_out)) => {
                    self.tally(&mut report, &outcome, timed_out, false);
                    self.mirror(&tx, &outcome, now).await;
                }
                Err(LedgerError::InvalidTransition { .. }) => report.unchanged += 1,
                Err(e) => report.errors.push(format!("{}: {}", tx.reference, e)),
            }
        }

        tracing::info!(
            examined = report.examined,
            resolved = report.resolved,
            timed_out = report.timed_out,
            errors = report.errors.len(),
            "staleness sweep finished"
        );
        Ok(report)
    }

    /// Settle open transfers from bank statement lines. Running the same statement twice
    /// changes nothing the second time.
    pub async fn reconcile_statement(
        &self,
        entries: &[StatementEntry],
        now: DateTime<Utc>,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let open = self.repo.find_open_transfers(self.policy.batch_size).await?;
        let mut report = ReconciliationReport {
            examined: open.len(),
            ..ReconciliationReport::default()
        };
        let cutoff = now - self.policy.timeout;
        let owners = self.entry_owners(&open, entries).await?;

        for tx in open {
            let mut settled = false;
            for entry in self.candidates(&tx, entries, &owners) {
                if !self
                    .repo
                    .claim_statement_entry(&entry.fingerprint(), tx.id)
                    .await?
                {
                    continue;
                }
                let input = NotificationInput::new(ObservedStatus::Success, TransitionSource::Reconciliation)
                    .amount(Some(entry.amount))
                    .reason("matched bank statement");
                match self.ledger.apply_notification(&tx.reference, &input, now).await {
                    Ok(outcome) => self.tally(&mut report, &outcome, false, true),
                    Err(e) => report.errors.push(format!("{}: {}", tx.reference, e)),
                }
                settled = true;
                break;
            }
            if settled {
                continue;
            }

            if tx.created_at < cutoff {
                let ctx = TransitionContext::new(TransitionSource::Reconciliation).reason(TIMEOUT_REASON);
                match self
                    .ledger
                    .transition(&tx.reference, TransactionStatus::Failed, ctx, now)
                    .await
                {
                    Ok(outcome) => self.tally(&mut report, &outcome, true, false),
                    Err(e) => report.errors.push(format!("{}: {}", tx.reference, e)),
                }
            } else {
                report.unchanged += 1;
            }
        }

        tracing::info!(
            entries = entries.len(),
            examined = report.examined,
            matched = report.matched,
            timed_out = report.timed_out,
            "statement reconciliation finished"
        );
        Ok(report)
    }

    /// For each statement line, the transaction its reference names, if any. Open transfers
    /// are checked by reference and gateway reference, anything else through the ledger.
    async fn entry_owners(
        &self,
        open: &[Transaction],
        entries: &[StatementEntry],
    ) -> Result<Vec<Option<Uuid>>, ReconciliationError> {
        let mut owners = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(reference) = entry.reference() else {
                owners.push(None);
                continue;
            };
            let owner = match open.iter().find(|tx| {
                tx.reference == reference || tx.gateway_ref.as_deref() == Some(reference)
            }) {
                Some(tx) => Some(tx.id),
                None => self.repo.get_by_reference(reference).await?.map(|tx| tx.id),
            };
            owners.push(owner);
        }
        Ok(owners)
    }

    /// Statement lines that could belong to `tx`, best match first: lines naming it by
    /// reference, then unowned lines with the amount within tolerance plus the account
    /// number or payee name. A line naming another transaction is never a candidate.
    fn candidates<'a>(
        &self,
        tx: &Transaction,
        entries: &'a [StatementEntry],
        owners: &[Option<Uuid>],
    ) -> Vec<&'a StatementEntry> {
        let Some(details) = tx.transfer_details() else {
            return Vec::new();
        };
        let owned = || entries.iter().zip(owners.iter().copied());

        let by_reference = owned()
            .filter(|(_, owner)| *owner == Some(tx.id))
            .map(|(entry, _)| entry);

        let name = details.beneficiary.normalized_name();
        let tolerance = self.policy.amount_tolerance.max(0) as u64;
        let by_shape = owned()
            .filter(|(entry, owner)| {
                owner.is_none()
                    && entry.amount.abs_diff(tx.amount) <= tolerance
                    && (entry.account_number.trim() == details.beneficiary.account_number
                        || normalize_name(&entry.name) == name)
            })
            .map(|(entry, _)| entry);

        by_reference.chain(by_shape).collect()
    }

    async fn verify(&self, tx: &Transaction) -> Option<Result<StatusReport, GatewayError>> {
        let result = match tx.kind {
            TransactionType::Deposit => self.gateway.verify_deposit(&tx.reference).await,
            TransactionType::CardPayment => self.gateway.verify_charge(&tx.reference).await,
            TransactionType::Transfer | TransactionType::Withdrawal => {
                self.gateway.verify_transfer(&tx.reference).await
            }
            _ => return None,
        };
        Some(result)
    }

    fn tally(
        &self,
        report: &mut ReconciliationReport,
        outcome: &ApplyOutcome,
        timed_out: bool,
        from_statement: bool,
    ) {
        match outcome {
            ApplyOutcome::Applied(_) if timed_out => report.timed_out += 1,
            ApplyOutcome::Applied(_) if from_statement => report.matched += 1,
            ApplyOutcome::Applied(_) => report.resolved += 1,
            _ => report.unchanged += 1,
        }
    }

    async fn mirror(&self, tx: &Transaction, outcome: &ApplyOutcome, now: DateTime<Utc>) {
        if tx.kind != TransactionType::Deposit {
            return;
        }
        if let Err(e) = self
            .virtual_accounts
            .sync_account(outcome.transaction(), None, now)
            .await
        {
            tracing::warn!(reference = %tx.reference, "virtual account sync failed: {}", e);
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementRow {
    account_number: String,
    amount: String,
    name: String,
    date: NaiveDate,
    #[serde(default)]
    reference: Option<String>,
}

/// Parse a CSV statement with an `accountNumber,amount,name,date,reference` header.
pub fn parse_statement_csv<R: Read>(
    reader: R,
    unit: AmountUnit,
) -> Result<Vec<StatementEntry>, ReconciliationError> {
    let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut entries = Vec::new();
    for (index, row) in csv.deserialize::<StatementRow>().enumerate() {
        let row = row.map_err(|e| ReconciliationError::Statement(format!("row {}: {}", index + 1, e)))?;
        let amount = unit
            .from_gateway(&serde_json::Value::String(row.amount.clone()))
            .map_err(|e| ReconciliationError::Statement(format!("row {}: {}", index + 1, e)))?;
        entries.push(StatementEntry {
            account_number: row.account_number,
            amount,
            name: row.name,
            date: row.date,
            reference: row.reference.filter(|r| !r.is_empty()),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_unit_statement() {
        let csv = "accountNumber,amount,name,date,reference\n\
                   0123456789,100.00,Ada Obi,2024-03-01,\n\
                   0987654321, 250.50 ,Grace Hopper,2024-03-02,TRF_ABC\n";
        let entries = parse_statement_csv(csv.as_bytes(), AmountUnit::Major).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, 10_000);
        assert_eq!(entries[0].reference, None);
        assert_eq!(entries[1].amount, 25_050);
        assert_eq!(entries[1].reference(), Some("TRF_ABC"));
    }

    #[test]
    fn bad_row_is_reported_with_its_number() {
        let csv = "accountNumber,amount,name,date,reference\n0123456789,abc,Ada,2024-03-01,\n";
        let err = parse_statement_csv(csv.as_bytes(), AmountUnit::Minor).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}
