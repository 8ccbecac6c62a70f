//! Kill switch sources.
//!
//! The flags live outside this process (a config table, a feature-flag
//! service). Every money-moving entry point asks the source right before it
//! acts, and treats an unreachable source as "disabled".

use std::sync::RwLock;

use async_trait::async_trait;
use cashmatch_types::{CashMatchError, KillSwitch, KillSwitchFlags, Result};

#[async_trait]
pub trait KillSwitchSource: Send + Sync {
    async fn flags(&self) -> Result<KillSwitchFlags>;
}

/// `Ok(())` if `switch` is enabled. Lookup failures fail closed.
pub async fn require_enabled(source: &dyn KillSwitchSource, switch: KillSwitch) -> Result<()> {
    match source.flags().await {
        Ok(flags) => flags.require(switch),
        Err(err) => {
            tracing::warn!(
                switch = switch.feature_name(),
                error = %err,
                "kill switch lookup failed, treating as disabled"
            );
            Err(CashMatchError::ServiceUnavailable {
                feature: switch.feature_name(),
            })
        }
    }
}

/// Operator-toggleable flags shared by every handler in the process.
#[derive(Debug, Default)]
pub struct InMemoryKillSwitches {
    flags: RwLock<KillSwitchFlags>,
}

impl InMemoryKillSwitches {
    #[must_use]
    pub fn new(flags: KillSwitchFlags) -> Self {
        Self {
            flags: RwLock::new(flags),
        }
    }

    /// Flip one switch. Returns the flags after the change.
    pub fn set(&self, switch: KillSwitch, enabled: bool) -> Result<KillSwitchFlags> {
        let mut flags = self
            .flags
            .write()
            .map_err(|_| CashMatchError::Internal("kill switch lock poisoned".into()))?;
        flags.set(switch, enabled);
        tracing::warn!(switch = switch.feature_name(), enabled, "kill switch changed");
        Ok(*flags)
    }
}

#[async_trait]
impl KillSwitchSource for InMemoryKillSwitches {
    async fn flags(&self) -> Result<KillSwitchFlags> {
        self.flags
            .read()
            .map(|f| *f)
            .map_err(|_| CashMatchError::Internal("kill switch lock poisoned".into()))
    }
}
