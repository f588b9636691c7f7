//! Operator approval bookkeeping.
//!
//! A payer grants each operator a rate allowance and a lockup allowance per
//! token. Rail modifications consume or release allowance as deltas against
//! the recorded usage. Decreases always succeed and saturate at zero, so an
//! operator can wind a rail down even after the payer cut the allowance
//! below what is already committed.

use serde::{Deserialize, Serialize};

use crate::rail_core::error::LedgerError;
use crate::rail_core::types::Epoch;

/// Per-(token, payer, operator) approval record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorApproval {
    pub is_approved: bool,
    pub rate_allowance: u128,
    pub lockup_allowance: u128,
    pub rate_usage: u128,
    pub lockup_usage: u128,
}

impl OperatorApproval {
    /// Admit a payment-rate change. Increases need headroom against
    /// `rate_allowance`; decreases saturate-subtract from usage.
    pub fn admit_rate_delta(&mut self, old_rate: u128, new_rate: u128) -> Result<(), LedgerError> {
        if new_rate > old_rate {
            let delta = new_rate - old_rate;
            let proposed = self
                .rate_usage
                .checked_add(delta)
                .ok_or(LedgerError::Arithmetic("rate usage accumulation"))?;
            if proposed > self.rate_allowance {
                return Err(LedgerError::RateAllowanceExceeded {
                    usage: self.rate_usage,
                    delta,
                    allowance: self.rate_allowance,
                });
            }
            self.rate_usage = proposed;
        } else {
            self.rate_usage = self.rate_usage.saturating_sub(old_rate - new_rate);
        }
        Ok(())
    }

    /// Admit a total-lockup change, same delta discipline against
    /// `lockup_allowance`.
    pub fn admit_lockup_delta(
        &mut self,
        old_total: u128,
        new_total: u128,
    ) -> Result<(), LedgerError> {
        if new_total > old_total {
            let delta = new_total - old_total;
            let proposed = self
                .lockup_usage
                .checked_add(delta)
                .ok_or(LedgerError::Arithmetic("lockup usage accumulation"))?;
            if proposed > self.lockup_allowance {
                return Err(LedgerError::LockupAllowanceExceeded {
                    usage: self.lockup_usage,
                    delta,
                    allowance: self.lockup_allowance,
                });
            }
            self.lockup_usage = proposed;
        } else {
            self.lockup_usage = self.lockup_usage.saturating_sub(old_total - new_total);
        }
        Ok(())
    }

    /// Zero allowances and clear the approval flag. Usage is preserved:
    /// rails already granted keep settling under their recorded terms.
    pub fn terminate(&mut self) {
        self.is_approved = false;
        self.rate_allowance = 0;
        self.lockup_allowance = 0;
    }
}

/// Total lockup a rail pins for a given rate: `rate * lockup_period +
/// lockup_fixed`.
pub fn rail_lockup_total(
    rate: u128,
    lockup_period: Epoch,
    lockup_fixed: u128,
) -> Result<u128, LedgerError> {
    rate.checked_mul(u128::from(lockup_period))
        .and_then(|v| v.checked_add(lockup_fixed))
        .ok_or(LedgerError::Arithmetic("rail lockup total"))
}

/// Admit a rate change against both allowances: the rate delta itself and
/// the induced change of the rail's total lockup.
pub fn admit_rate_change(
    approval: &mut OperatorApproval,
    old_rate: u128,
    new_rate: u128,
    lockup_period: Epoch,
    lockup_fixed: u128,
) -> Result<(), LedgerError> {
    let old_total = rail_lockup_total(old_rate, lockup_period, lockup_fixed)?;
    let new_total = rail_lockup_total(new_rate, lockup_period, lockup_fixed)?;
    approval.admit_lockup_delta(old_total, new_total)?;
    approval.admit_rate_delta(old_rate, new_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approved(rate_allowance: u128, lockup_allowance: u128) -> OperatorApproval {
        OperatorApproval {
            is_approved: true,
            rate_allowance,
            lockup_allowance,
            rate_usage: 0,
            lockup_usage: 0,
        }
    }

    #[test]
    fn test_rate_increase_within_allowance() {
        let mut a = approved(10, 1000);
        a.admit_rate_delta(0, 10).unwrap();
        assert_eq!(a.rate_usage, 10);
    }

    #[test]
    fn test_rate_increase_beyond_allowance() {
        let mut a = approved(10, 1000);
        let err = a.admit_rate_delta(0, 11).unwrap_err();
        assert_eq!(err.error_code(), "ALLOWANCE_EXCEEDED");
        assert_eq!(a.rate_usage, 0);
    }

    #[test]
    fn test_rate_decrease_admitted_after_allowance_cut() {
        // Usage can legitimately exceed a later-reduced allowance; the
        // decrease still goes through and usage lands at the new rate.
        let mut a = approved(10, 1000);
        a.admit_rate_delta(0, 10).unwrap();
        a.rate_allowance = 3;
        a.admit_rate_delta(10, 2).unwrap();
        assert_eq!(a.rate_usage, 2);
    }

    #[test]
    fn test_rate_decrease_saturates() {
        let mut a = approved(10, 1000);
        a.rate_usage = 4;
        a.admit_rate_delta(9, 2).unwrap();
        assert_eq!(a.rate_usage, 0);
    }

    #[test]
    fn test_lockup_delta_headroom() {
        let mut a = approved(10, 100);
        a.admit_lockup_delta(0, 100).unwrap();
        assert_eq!(a.lockup_usage, 100);
        let err = a.admit_lockup_delta(100, 101).unwrap_err();
        assert_eq!(err.error_code(), "ALLOWANCE_EXCEEDED");
    }

    #[test]
    fn test_terminate_preserves_usage() {
        let mut a = approved(10, 100);
        a.admit_rate_delta(0, 5).unwrap();
        a.admit_lockup_delta(0, 50).unwrap();
        a.terminate();
        assert!(!a.is_approved);
        assert_eq!(a.rate_allowance, 0);
        assert_eq!(a.lockup_allowance, 0);
        assert_eq!(a.rate_usage, 5);
        assert_eq!(a.lockup_usage, 50);
    }

    #[test]
    fn test_admit_rate_change_combined() {
        let mut a = approved(10, 1000);
        // rate 0 -> 5 over period 10, fixed 0: lockup delta 50, rate delta 5
        admit_rate_change(&mut a, 0, 5, 10, 0).unwrap();
        assert_eq!(a.rate_usage, 5);
        assert_eq!(a.lockup_usage, 50);
        // back down to 2: usage follows
        admit_rate_change(&mut a, 5, 2, 10, 0).unwrap();
        assert_eq!(a.rate_usage, 2);
        assert_eq!(a.lockup_usage, 20);
    }
}
