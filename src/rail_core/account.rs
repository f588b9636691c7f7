//! Payer/payee accounts and the lockup settler.
//!
//! An account is keyed by (token, owner) in the ledger. `lockup_rate` is the
//! sum of payment rates over all non-terminated rails the owner pays for;
//! `settle_lockup` folds elapsed epochs of that rate into `lockup_current`.

use serde::{Deserialize, Serialize};

use crate::rail_core::error::LedgerError;
use crate::rail_core::types::Epoch;

/// Per-(token, owner) account state.
///
/// # Invariants
/// 1. `lockup_current <= funds` at the end of every top-level command.
/// 2. `lockup_last_settled_at <= current_epoch`.
/// 3. `lockup_rate` equals the sum of `payment_rate` over the owner's
///    active, non-terminated rails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub funds: u128,
    pub lockup_current: u128,
    pub lockup_rate: u128,
    pub lockup_last_settled_at: Epoch,
}

/// Outcome of a lockup settlement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockupSettlement {
    /// True when lockup is fully accrued through the current epoch.
    pub fully_settled: bool,
    /// The epoch lockup accrual actually reached.
    pub settled_upto: Epoch,
}

impl Account {
    /// Accounts are created lazily; the lockup cursor starts at the epoch of
    /// first contact so no phantom accrual is owed for earlier epochs.
    pub fn new(epoch: Epoch) -> Self {
        Self { funds: 0, lockup_current: 0, lockup_rate: 0, lockup_last_settled_at: epoch }
    }

    /// Funds not reserved against rail commitments.
    pub fn available(&self) -> u128 {
        self.funds.saturating_sub(self.lockup_current)
    }

    /// Advance `lockup_last_settled_at` toward `current_epoch`, converting
    /// elapsed epochs of `lockup_rate` into `lockup_current`.
    ///
    /// When funds cannot cover the full accrual, advances by the largest
    /// whole number of epochs the available funds pay for and reports
    /// `fully_settled = false`. Truncating to whole epochs keeps the cursor
    /// conservative: settlement never promises an epoch it cannot fund.
    ///
    /// Idempotent for a fixed `current_epoch`.
    pub fn settle_lockup(&mut self, current_epoch: Epoch) -> Result<LockupSettlement, LedgerError> {
        let elapsed = current_epoch
            .checked_sub(self.lockup_last_settled_at)
            .ok_or(LedgerError::Arithmetic("lockup cursor ahead of current epoch"))?;
        if elapsed == 0 {
            return Ok(LockupSettlement {
                fully_settled: true,
                settled_upto: self.lockup_last_settled_at,
            });
        }

        if self.lockup_rate == 0 {
            self.lockup_last_settled_at = current_epoch;
            return Ok(LockupSettlement { fully_settled: true, settled_upto: current_epoch });
        }

        let additional = self
            .lockup_rate
            .checked_mul(u128::from(elapsed))
            .ok_or(LedgerError::Arithmetic("lockup accrual"))?;
        let fully_accrued = self
            .lockup_current
            .checked_add(additional)
            .ok_or(LedgerError::Arithmetic("lockup accrual"))?;

        if self.funds >= fully_accrued {
            self.lockup_current = fully_accrued;
            self.lockup_last_settled_at = current_epoch;
            return Ok(LockupSettlement { fully_settled: true, settled_upto: current_epoch });
        }

        // Partial settlement: advance by whole epochs only.
        let available = self.funds.saturating_sub(self.lockup_current);
        let whole_epochs = available / self.lockup_rate;
        if whole_epochs > 0 {
            // whole_epochs < elapsed here, so the cast cannot truncate.
            let advance = whole_epochs as Epoch;
            self.lockup_current += self.lockup_rate * whole_epochs;
            self.lockup_last_settled_at += advance;
        }

        Ok(LockupSettlement {
            fully_settled: false,
            settled_upto: self.lockup_last_settled_at,
        })
    }
}
