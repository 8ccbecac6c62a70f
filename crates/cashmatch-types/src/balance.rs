//! Wallet balance for the CashMatch ledger model.
//!
//! Every user has an `available` balance (usable for entries and new
//! withdrawals) and a `locked` balance (reserved by pending withdrawal
//! requests). Both are integer cents and never negative.
//!
//! The mutators here are the conditional half of every "check-then-mutate"
//! money operation: each one validates and applies in the same call, and
//! leaves the balance untouched when it returns an error.

use serde::{Deserialize, Serialize};

use crate::{CashMatchError, Result, UserId};

/// Available/locked balance for one user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletBalance {
    pub user_id: UserId,
    /// Spendable on match entries and withdrawals.
    pub available_cents: i64,
    /// Reserved for withdrawal requests awaiting payout.
    pub locked_cents: i64,
}

impl WalletBalance {
    /// Create a zero balance.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            available_cents: 0,
            locked_cents: 0,
        }
    }

    /// Total balance (available + locked).
    #[must_use]
    pub fn total_cents(&self) -> i64 {
        self.available_cents + self.locked_cents
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.available_cents == 0 && self.locked_cents == 0
    }

    /// Add to available.
    pub fn credit(&mut self, amount_cents: i64) -> Result<()> {
        ensure_positive(amount_cents)?;
        self.available_cents = self
            .available_cents
            .checked_add(amount_cents)
            .ok_or_else(|| CashMatchError::Internal("available balance overflow".into()))?;
        Ok(())
    }

    /// Remove from available, failing if `available < amount`.
    pub fn debit(&mut self, amount_cents: i64) -> Result<()> {
        ensure_positive(amount_cents)?;
        if self.available_cents < amount_cents {
            return Err(CashMatchError::InsufficientFunds {
                needed: amount_cents,
                available: self.available_cents,
            });
        }
        self.available_cents -= amount_cents;
        Ok(())
    }

    /// Move available → locked in one step.
    pub fn lock(&mut self, amount_cents: i64) -> Result<()> {
        self.debit(amount_cents)?;
        self.locked_cents += amount_cents;
        Ok(())
    }

    /// Move locked → available (withdrawal rejected or failed).
    pub fn unlock(&mut self, amount_cents: i64) -> Result<()> {
        self.consume_locked(amount_cents)?;
        self.available_cents += amount_cents;
        Ok(())
    }

    /// Remove locked funds permanently (withdrawal paid out).
    pub fn consume_locked(&mut self, amount_cents: i64) -> Result<()> {
        ensure_positive(amount_cents)?;
        if self.locked_cents < amount_cents {
            return Err(CashMatchError::InsufficientLocked {
                needed: amount_cents,
                locked: self.locked_cents,
            });
        }
        self.locked_cents -= amount_cents;
        Ok(())
    }
}

fn ensure_positive(amount_cents: i64) -> Result<()> {
    if amount_cents <= 0 {
        return Err(CashMatchError::validation(format!(
            "amount must be positive, got {amount_cents}"
        )));
    }
    Ok(())
}
