//! Platform-wide kill switches.

use serde::{Deserialize, Serialize};

/// Snapshot of the global money-movement flags.
///
/// Every flag defaults to enabled; operators flip one off to halt a whole
/// category of operations across all running instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchFlags {
    pub deposits_enabled: bool,
    pub withdrawals_enabled: bool,
    pub settlement_enabled: bool,
}

impl Default for KillSwitchFlags {
    fn default() -> Self {
        Self {
            deposits_enabled: true,
            withdrawals_enabled: true,
            settlement_enabled: true,
        }
    }
}

/// Names a single flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitch {
    Deposits,
    Withdrawals,
    Settlement,
}

impl KillSwitch {
    #[must_use]
    pub fn feature_name(&self) -> &'static str {
        match self {
            Self::Deposits => "deposits",
            Self::Withdrawals => "withdrawals",
            Self::Settlement => "settlement",
        }
    }
}

impl KillSwitchFlags {
    #[must_use]
    pub fn is_enabled(&self, switch: KillSwitch) -> bool {
        match switch {
            KillSwitch::Deposits => self.deposits_enabled,
            KillSwitch::Withdrawals => self.withdrawals_enabled,
            KillSwitch::Settlement => self.settlement_enabled,
        }
    }

    pub fn set(&mut self, switch: KillSwitch, enabled: bool) {
        match switch {
            KillSwitch::Deposits => self.deposits_enabled = enabled,
            KillSwitch::Withdrawals => self.withdrawals_enabled = enabled,
            KillSwitch::Settlement => self.settlement_enabled = enabled,
        }
    }

    /// `Ok(())` if enabled, else `ServiceUnavailable`.
    pub fn require(&self, switch: KillSwitch) -> crate::Result<()> {
        if self.is_enabled(switch) {
            Ok(())
        } else {
            Err(crate::CashMatchError::ServiceUnavailable {
                feature: switch.feature_name(),
            })
        }
    }
}
