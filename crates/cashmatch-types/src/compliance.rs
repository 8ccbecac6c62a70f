//! Identity/compliance facts consumed by the withdrawal gate.
//!
//! The engine never decides KYC or computes fraud scores; it reads the
//! verdicts from the compliance subsystem and treats them as opaque facts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceProfile {
    pub user_id: UserId,
    pub kyc_status: KycStatus,
    pub kyc_tier: u8,
    /// Set by compliance to block withdrawals without freezing the account.
    pub withdrawal_locked: bool,
    /// 0–100 behavioural risk score.
    pub fraud_score: u8,
    pub account_created_at: DateTime<Utc>,
    /// Hard freeze: no money movement at all.
    pub frozen: bool,
}

impl ComplianceProfile {
    #[must_use]
    pub fn account_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.account_created_at
    }
}

/// A verified, unfrozen, low-risk profile for unit tests.
#[cfg(any(test, feature = "test-helpers"))]
impl ComplianceProfile {
    pub fn verified(user_id: UserId, account_created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            kyc_status: KycStatus::Approved,
            kyc_tier: 2,
            withdrawal_locked: false,
            fraud_score: 10,
            account_created_at,
            frozen: false,
        }
    }
}
