//! Transfer pricing and limit rules.

use serde::{Deserialize, Serialize};

/// Destination of an outbound bank transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beneficiary {
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
}

impl Beneficiary {
    /// Lower-cased name with collapsed whitespace, used for statement matching.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.account_name)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    pub fixed: i64,
    /// Percentage component in basis points (50 = 0.5%).
    pub bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self { fixed: 100, bps: 50 }
    }
}

impl FeeSchedule {
    /// Fixed fee plus the percentage part rounded up to the next minor unit.
    pub fn fee_for(&self, amount: i64) -> i64 {
        let scaled = i128::from(amount) * i128::from(self.bps);
        let percentage = (scaled + 9_999) / 10_000;
        self.fixed + percentage as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    pub min: i64,
    pub max: i64,
    pub daily: i64,
    pub monthly: i64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            min: 10_000,
            max: 500_000_000,
            daily: 1_000_000_000,
            monthly: 10_000_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_fee_on_ten_thousand() {
        assert_eq!(FeeSchedule::default().fee_for(10_000), 150);
    }

    #[test]
    fn percentage_rounds_up() {
        let fees = FeeSchedule { fixed: 0, bps: 50 };
        // 0.5% of 10_001 is 50.005
        assert_eq!(fees.fee_for(10_001), 51);
        assert_eq!(fees.fee_for(0), 0);
    }

    #[test]
    fn names_normalize() {
        assert_eq!(normalize_name("  Ada   LOVELACE "), "ada lovelace");
    }
}
