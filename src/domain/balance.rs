use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: Uuid,
    pub available: i64,
    pub locked: i64,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            available: 0,
            locked: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Single atomic mutation applied to a user balance alongside a ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "amount", rename_all = "snake_case")]
pub enum BalanceEffect {
    None,
    /// available += amount
    Credit(i64),
    /// available -= amount, allowed to go negative (chargebacks)
    Debit(i64),
    /// available -= amount, locked += amount; requires available >= amount
    Lock(i64),
    /// locked -= amount, available += amount
    Release(i64),
    /// locked -= amount
    Capture(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("insufficient balance: required {required}, available {available}")]
    Insufficient { required: i64, available: i64 },
    #[error("locked balance underflow: releasing {amount}, locked {locked}")]
    LockUnderflow { amount: i64, locked: i64 },
}

impl BalanceEffect {
    pub fn is_none(&self) -> bool {
        matches!(self, BalanceEffect::None)
    }

    /// Pure form of the mutation; storage adapters must express the same rule atomically.
    pub fn apply(&self, balance: &Balance) -> Result<Balance, BalanceError> {
        let mut next = balance.clone();
        match *self {
            BalanceEffect::None => {}
            BalanceEffect::Credit(amount) => next.available += amount,
            BalanceEffect::Debit(amount) => next.available -= amount,
            BalanceEffect::Lock(amount) => {
                if balance.available < amount {
                    return Err(BalanceError::Insufficient {
                        required: amount,
                        available: balance.available,
                    });
                }
                next.available -= amount;
                next.locked += amount;
            }
            BalanceEffect::Release(amount) => {
                if balance.locked < amount {
                    return Err(BalanceError::LockUnderflow {
                        amount,
                        locked: balance.locked,
                    });
                }
                next.locked -= amount;
                next.available += amount;
            }
            BalanceEffect::Capture(amount) => {
                if balance.locked < amount {
                    return Err(BalanceError::LockUnderflow {
                        amount,
                        locked: balance.locked,
                    });
                }
                next.locked -= amount;
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balance(available: i64, locked: i64) -> Balance {
        Balance {
            available,
            locked,
            ..Balance::empty(Uuid::nil())
        }
    }

    #[test]
    fn lock_requires_available_funds() {
        let err = BalanceEffect::Lock(10_150).apply(&balance(10_000, 0)).unwrap_err();
        assert_eq!(
            err,
            BalanceError::Insufficient {
                required: 10_150,
                available: 10_000
            }
        );
    }

    #[test]
    fn lock_then_release_restores_available() {
        let start = balance(20_000, 0);
        let locked = BalanceEffect::Lock(10_150).apply(&start).unwrap();
        assert_eq!(locked.available, 9_850);
        assert_eq!(locked.locked, 10_150);

        let released = BalanceEffect::Release(10_150).apply(&locked).unwrap();
        assert_eq!(released.available, start.available);
        assert_eq!(released.locked, 0);
    }

    #[test]
    fn capture_only_drains_the_lock() {
        let captured = BalanceEffect::Capture(150).apply(&balance(50, 150)).unwrap();
        assert_eq!(captured.available, 50);
        assert_eq!(captured.locked, 0);
        assert!(BalanceEffect::Capture(151).apply(&balance(50, 150)).is_err());
    }
}
