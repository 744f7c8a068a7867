use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::transfer::normalize_name;

/// One line of a bank statement, amounts in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementEntry {
    pub account_number: String,
    pub amount: i64,
    pub name: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub reference: Option<String>,
}

impl StatementEntry {
    /// Stable identity of the entry, used to claim it at most once across runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.account_number.trim().as_bytes());
        hasher.update(b"|");
        hasher.update(self.amount.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(normalize_name(&self.name).as_bytes());
        hasher.update(b"|");
        hasher.update(self.date.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.reference.as_deref().unwrap_or("").trim().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }
}
