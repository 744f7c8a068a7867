use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualAccountStatus {
    Pending,
    Success,
    Mismatch,
    Expired,
    Failed,
}

impl VirtualAccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VirtualAccountStatus::Pending => "pending",
            VirtualAccountStatus::Success => "success",
            VirtualAccountStatus::Mismatch => "mismatch",
            VirtualAccountStatus::Expired => "expired",
            VirtualAccountStatus::Failed => "failed",
        }
    }

    /// Pending resolves once; a mismatch is resolved once more by manual review.
    pub fn can_transition_to(&self, next: VirtualAccountStatus) -> bool {
        match self {
            VirtualAccountStatus::Pending => next != VirtualAccountStatus::Pending,
            VirtualAccountStatus::Mismatch => matches!(
                next,
                VirtualAccountStatus::Success | VirtualAccountStatus::Failed
            ),
            _ => false,
        }
    }
}

impl fmt::Display for VirtualAccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VirtualAccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VirtualAccountStatus::Pending),
            "success" => Ok(VirtualAccountStatus::Success),
            "mismatch" => Ok(VirtualAccountStatus::Mismatch),
            "expired" => Ok(VirtualAccountStatus::Expired),
            "failed" => Ok(VirtualAccountStatus::Failed),
            other => Err(format!("unknown virtual account status: {other}")),
        }
    }
}

/// Ephemeral deposit destination bound to one ledger reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualAccount {
    pub id: Uuid,
    pub reference: String,
    pub user_id: Uuid,
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
    pub expected_amount: i64,
    pub deposited_amount: Option<i64>,
    pub sender_name: Option<String>,
    pub status: VirtualAccountStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VirtualAccount {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == VirtualAccountStatus::Pending && now >= self.expires_at
    }

    /// Status as a reader should see it: pending accounts past `expires_at` read as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> VirtualAccountStatus {
        if self.is_overdue(now) {
            VirtualAccountStatus::Expired
        } else {
            self.status
        }
    }

    pub fn presented(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(expires_at: DateTime<Utc>) -> VirtualAccount {
        let now = Utc::now();
        VirtualAccount {
            id: Uuid::new_v4(),
            reference: "DVA_1".to_string(),
            user_id: Uuid::new_v4(),
            account_number: "9900112233".to_string(),
            account_name: "Settlement/Ada".to_string(),
            bank_name: "Test Bank".to_string(),
            expected_amount: 150_000,
            deposited_amount: None,
            sender_name: None,
            status: VirtualAccountStatus::Pending,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn overdue_pending_reads_as_expired() {
        let now = Utc::now();
        let va = account(now - Duration::minutes(1));
        assert_eq!(va.effective_status(now), VirtualAccountStatus::Expired);
        assert_eq!(va.status, VirtualAccountStatus::Pending);
    }

    #[test]
    fn only_pending_and_mismatch_move() {
        assert!(VirtualAccountStatus::Pending.can_transition_to(VirtualAccountStatus::Mismatch));
        assert!(VirtualAccountStatus::Mismatch.can_transition_to(VirtualAccountStatus::Success));
        assert!(!VirtualAccountStatus::Mismatch.can_transition_to(VirtualAccountStatus::Expired));
        assert!(!VirtualAccountStatus::Success.can_transition_to(VirtualAccountStatus::Expired));
        assert!(!VirtualAccountStatus::Pending.can_transition_to(VirtualAccountStatus::Pending));
    }
}
