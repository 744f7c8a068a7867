//! Conversion between ledger minor units and whatever unit a gateway endpoint speaks.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountUnit {
    /// Integer kobo.
    Minor,
    /// Naira as a decimal with at most two places.
    Major,
}

impl FromStr for AmountUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minor" | "kobo" => Ok(AmountUnit::Minor),
            "major" | "naira" => Ok(AmountUnit::Major),
            other => Err(format!("unknown amount unit: {other}")),
        }
    }
}

impl fmt::Display for AmountUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountUnit::Minor => f.write_str("minor"),
            AmountUnit::Major => f.write_str("major"),
        }
    }
}

/// Unit per gateway operation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayUnits {
    pub deposit: AmountUnit,
    pub charge: AmountUnit,
    pub transfer: AmountUnit,
    pub webhook: AmountUnit,
}

impl Default for GatewayUnits {
    fn default() -> Self {
        Self {
            deposit: AmountUnit::Minor,
            charge: AmountUnit::Minor,
            transfer: AmountUnit::Minor,
            webhook: AmountUnit::Minor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("amount {0} has precision below one minor unit")]
    SubMinorPrecision(String),
    #[error("amount {0} is not a number")]
    NotANumber(String),
    #[error("amount {0} is out of range")]
    OutOfRange(String),
}

impl AmountUnit {
    /// JSON value to send for a minor-unit amount.
    pub fn to_gateway(&self, minor: i64) -> Value {
        match self {
            AmountUnit::Minor => Value::from(minor),
            AmountUnit::Major => {
                let major = BigDecimal::new(minor.into(), 2);
                Value::String(major.with_scale(2).to_string())
            }
        }
    }

    /// Parse a gateway amount (JSON number or numeric string) into minor units.
    pub fn from_gateway(&self, value: &Value) -> Result<i64, UnitError> {
        let raw = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            other => return Err(UnitError::NotANumber(other.to_string())),
        };
        let parsed =
            BigDecimal::from_str(&raw).map_err(|_| UnitError::NotANumber(raw.clone()))?;
        let minor = match self {
            AmountUnit::Minor => parsed,
            AmountUnit::Major => parsed * BigDecimal::from(100),
        };
        if !minor.is_integer() {
            return Err(UnitError::SubMinorPrecision(raw));
        }
        match minor.to_i64() {
            Some(value) if value >= 0 => Ok(value),
            _ => Err(UnitError::OutOfRange(raw)),
        }
    }
}
