//! Rail lifecycle commands: create, modify lockup, modify payment,
//! terminate.
//!
//! Modifications run under the per-rail lock and inside the rail's rollback
//! scope; a failed command restores accounts, rail, and approval exactly.

use crate::rail_core::approval::{admit_rate_change, rail_lockup_total};
use crate::rail_core::error::LedgerError;
use crate::rail_core::events::LedgerEvent;
use crate::rail_core::rail::Rail;
use crate::rail_core::types::{AddrId, Epoch, RailId, TokenId};
use crate::rail_core::vault::TokenVault;

use super::core::PaymentLedger;

impl<V: TokenVault> PaymentLedger<V> {
    /// Create a rail from `from` to `to`, operated by the caller. Requires
    /// the caller to be approved by `from` for `token`; the arbiter, if
    /// given, must be registered. Rate, lockup period, and fixed lockup all
    /// start at zero, so creation consumes no allowance.
    pub fn create_rail(
        &mut self,
        caller: AddrId,
        token: TokenId,
        from: AddrId,
        to: AddrId,
        arbiter: Option<AddrId>,
    ) -> Result<RailId, LedgerError> {
        let approved = self
            .approvals
            .get(&(token, from, caller))
            .map(|a| a.is_approved)
            .unwrap_or(false);
        if !approved {
            return Err(LedgerError::OperatorNotApproved { token, payer: from, operator: caller });
        }
        if let Some(addr) = arbiter {
            if !self.arbiters.contains_key(&addr) {
                return Err(LedgerError::ArbiterMissing(addr));
            }
        }

        let rail_id = self.next_rail_id;
        self.next_rail_id += 1;
        self.rails.insert(rail_id, Rail::new(token, from, to, caller, arbiter, self.current_epoch));
        self.client_operator_rails.entry((from, caller)).or_default().push(rail_id);
        self.push_event(LedgerEvent::RailCreated {
            rail_id,
            token,
            from,
            to,
            operator: caller,
            arbiter,
        });
        log::info!(
            "[RAIL_CREATE] rail_id={} token={} from={} to={} operator={}",
            rail_id,
            token,
            from,
            to,
            caller
        );
        Ok(rail_id)
    }

    /// Change a rail's lockup period and fixed lockup. Operator only.
    /// Requires the payer fully settled to the current epoch so the lockup
    /// delta is computed against an up-to-date reservation.
    pub fn modify_rail_lockup(
        &mut self,
        caller: AddrId,
        rail_id: RailId,
        period: Epoch,
        fixed: u128,
    ) -> Result<(), LedgerError> {
        self.with_rail_lock(rail_id, |ledger| {
            ledger.modify_rail_lockup_inner(caller, rail_id, period, fixed)
        })
    }

    fn modify_rail_lockup_inner(
        &mut self,
        caller: AddrId,
        rail_id: RailId,
        period: Epoch,
        fixed: u128,
    ) -> Result<(), LedgerError> {
        let rail = self.rails.get(&rail_id).ok_or(LedgerError::RailMissing(rail_id))?;
        let (token, from, operator) = (rail.token, rail.from, rail.operator);
        let (rate, old_period, old_fixed) = (rail.payment_rate, rail.lockup_period, rail.lockup_fixed);
        let terminated = rail.is_terminated();
        if !rail.is_active {
            return Err(LedgerError::RailInactive(rail_id));
        }
        if caller != operator {
            return Err(LedgerError::AuthorizationDenied { caller, action: "modify rail lockup" });
        }

        let settlement = self.settle_account_lockup(token, from)?;
        if !settlement.fully_settled || settlement.settled_upto != self.current_epoch {
            return Err(LedgerError::LockupNotSettled {
                settled_upto: settlement.settled_upto,
                required: self.current_epoch,
            });
        }

        if terminated {
            if period != old_period {
                return Err(LedgerError::TerminatedRailRestriction {
                    rail_id,
                    change: "lockup period change",
                });
            }
            if fixed > old_fixed {
                return Err(LedgerError::TerminatedRailRestriction {
                    rail_id,
                    change: "fixed lockup increase",
                });
            }
        }

        let old_total = rail_lockup_total(rate, old_period, old_fixed)?;
        let new_total = rail_lockup_total(rate, period, fixed)?;
        self.approvals
            .entry((token, from, operator))
            .or_default()
            .admit_lockup_delta(old_total, new_total)?;

        let acct = self.account_entry(token, from);
        acct.lockup_current = if new_total >= old_total {
            acct.lockup_current
                .checked_add(new_total - old_total)
                .ok_or(LedgerError::Arithmetic("lockup reservation"))?
        } else {
            acct.lockup_current
                .checked_sub(old_total - new_total)
                .ok_or(LedgerError::InvariantBroken("lockup release exceeds account lockup"))?
        };
        if acct.lockup_current > acct.funds {
            return Err(LedgerError::InsufficientFunds {
                available: acct.funds,
                required: acct.lockup_current,
            });
        }

        if let Some(rail) = self.rails.get_mut(&rail_id) {
            rail.lockup_period = period;
            rail.lockup_fixed = fixed;
        }
        self.push_event(LedgerEvent::RailLockupModified {
            rail_id,
            lockup_period: period,
            lockup_fixed: fixed,
        });
        Ok(())
    }

    /// Change a rail's payment rate and/or make a one-time payment drawn
    /// from the fixed lockup. Operator only.
    pub fn modify_rail_payment(
        &mut self,
        caller: AddrId,
        rail_id: RailId,
        new_rate: u128,
        one_time_payment: u128,
    ) -> Result<(), LedgerError> {
        self.with_rail_lock(rail_id, |ledger| {
            ledger.modify_rail_payment_inner(caller, rail_id, new_rate, one_time_payment)
        })
    }

    fn modify_rail_payment_inner(
        &mut self,
        caller: AddrId,
        rail_id: RailId,
        new_rate: u128,
        one_time_payment: u128,
    ) -> Result<(), LedgerError> {
        let rail = self.rails.get(&rail_id).ok_or(LedgerError::RailMissing(rail_id))?;
        let (token, from, to, operator) = (rail.token, rail.from, rail.to, rail.operator);
        let old_rate = rail.payment_rate;
        let lockup_period = rail.lockup_period;
        let has_arbiter = rail.arbiter.is_some();
        let terminated = rail.is_terminated();
        if !rail.is_active {
            return Err(LedgerError::RailInactive(rail_id));
        }
        if caller != operator {
            return Err(LedgerError::AuthorizationDenied { caller, action: "modify rail payment" });
        }

        let epoch = self.current_epoch;
        let settlement = self.settle_account_lockup(token, from)?;

        if terminated && new_rate > old_rate {
            return Err(LedgerError::TerminatedRailRestriction { rail_id, change: "rate increase" });
        }
        if new_rate > old_rate
            && !(settlement.fully_settled && settlement.settled_upto == epoch)
        {
            return Err(LedgerError::LockupNotSettled {
                settled_upto: settlement.settled_upto,
                required: epoch,
            });
        }
        if new_rate != old_rate {
            // A rail is in debt once the payer cannot even cover its own
            // lockup window; rate changes are frozen until funds arrive.
            let horizon = settlement.settled_upto.saturating_add(lockup_period);
            if epoch >= horizon {
                return Err(LedgerError::DebtBlocked {
                    rail_id,
                    settled_upto: settlement.settled_upto,
                    lockup_period,
                });
            }
        }

        let rail_fixed = self
            .rails
            .get(&rail_id)
            .map(|r| r.lockup_fixed)
            .ok_or(LedgerError::RailMissing(rail_id))?;
        if one_time_payment > rail_fixed {
            return Err(LedgerError::InsufficientLockup {
                available: rail_fixed,
                required: one_time_payment,
            });
        }

        admit_rate_change(
            self.approvals.entry((token, from, operator)).or_default(),
            old_rate,
            new_rate,
            lockup_period,
            rail_fixed,
        )?;

        if new_rate != old_rate {
            if !has_arbiter {
                // Without an arbiter the elapsed window settles right now at
                // the old rate; afterwards the new rate applies cleanly.
                let result = self.settle_rail_inner(rail_id, epoch, false)?;
                if result.final_epoch != epoch {
                    return Err(LedgerError::LockupNotSettled {
                        settled_upto: result.final_epoch,
                        required: epoch,
                    });
                }
            } else if let Some(rail) = self.rails.get_mut(&rail_id) {
                // Preserve the old rate for the unsettled window so deferred
                // arbitration applies the rate that was actually in force.
                let already_queued =
                    rail.rate_queue.newest().map(|e| e.until_epoch == epoch).unwrap_or(false);
                if !already_queued {
                    rail.rate_queue.enqueue(old_rate, epoch);
                }
            }
        }

        let settled_at = self
            .accounts
            .get(&(token, from))
            .map(|a| a.lockup_last_settled_at)
            .ok_or(LedgerError::AccountMissing { token, owner: from })?;
        let elapsed = epoch
            .checked_sub(settled_at)
            .ok_or(LedgerError::Arithmetic("lockup cursor ahead of current epoch"))?;
        let effective_period = lockup_period.saturating_sub(elapsed);

        let old_component = old_rate
            .checked_mul(u128::from(effective_period))
            .ok_or(LedgerError::Arithmetic("old rate lockup component"))?;
        let new_component = new_rate
            .checked_mul(u128::from(effective_period))
            .ok_or(LedgerError::Arithmetic("new rate lockup component"))?;
        let release = old_component
            .checked_add(one_time_payment)
            .ok_or(LedgerError::Arithmetic("lockup release"))?;

        {
            let acct = self.account_entry(token, from);
            if acct.lockup_current < release {
                return Err(LedgerError::InsufficientLockup {
                    available: acct.lockup_current,
                    required: release,
                });
            }
            if acct.funds < one_time_payment {
                return Err(LedgerError::InsufficientFunds {
                    available: acct.funds,
                    required: one_time_payment,
                });
            }
            acct.lockup_current = (acct.lockup_current - release)
                .checked_add(new_component)
                .ok_or(LedgerError::Arithmetic("lockup reservation"))?;
            if !terminated {
                acct.lockup_rate = acct
                    .lockup_rate
                    .checked_sub(old_rate)
                    .and_then(|r| r.checked_add(new_rate))
                    .ok_or(LedgerError::InvariantBroken("payer lockup rate accounting"))?;
            }
            acct.funds -= one_time_payment;
        }
        if one_time_payment > 0 {
            let payee = self.account_entry(token, to);
            payee.funds = payee
                .funds
                .checked_add(one_time_payment)
                .ok_or(LedgerError::Arithmetic("one-time payment credit"))?;
        }

        if let Some(rail) = self.rails.get_mut(&rail_id) {
            rail.lockup_fixed -= one_time_payment;
            rail.payment_rate = new_rate;
        }

        let acct = self.account_entry(token, from);
        if acct.lockup_current > acct.funds {
            return Err(LedgerError::InsufficientFunds {
                available: acct.funds,
                required: acct.lockup_current,
            });
        }

        if new_rate < old_rate {
            // The reduced rate must leave the account fully settleable; a
            // still-underfunded account means the decrease did not help.
            let settlement = self.settle_account_lockup(token, from)?;
            if !settlement.fully_settled || settlement.settled_upto != epoch {
                return Err(LedgerError::LockupNotSettled {
                    settled_upto: settlement.settled_upto,
                    required: epoch,
                });
            }
        }

        self.push_event(LedgerEvent::RailPaymentModified {
            rail_id,
            old_rate,
            new_rate,
            one_time_payment,
        });
        Ok(())
    }

    /// Request termination. Callable by payer, payee, or operator. The rail
    /// keeps settling at its final rate until `termination_epoch +
    /// lockup_period`; the next settlement past that point finalizes it.
    pub fn terminate_rail(&mut self, caller: AddrId, rail_id: RailId) -> Result<(), LedgerError> {
        self.with_rail_lock(rail_id, |ledger| ledger.terminate_rail_inner(caller, rail_id))
    }

    fn terminate_rail_inner(&mut self, caller: AddrId, rail_id: RailId) -> Result<(), LedgerError> {
        let rail = self.rails.get(&rail_id).ok_or(LedgerError::RailMissing(rail_id))?;
        let (token, from, to, operator) = (rail.token, rail.from, rail.to, rail.operator);
        let payment_rate = rail.payment_rate;
        if !rail.is_active {
            return Err(LedgerError::RailInactive(rail_id));
        }
        if rail.is_terminated() {
            return Err(LedgerError::AlreadyTerminated(rail_id));
        }
        if caller != from && caller != to && caller != operator {
            return Err(LedgerError::AuthorizationDenied { caller, action: "terminate rail" });
        }

        self.settle_account_lockup(token, from)?;

        let epoch = self.current_epoch;
        if let Some(rail) = self.rails.get_mut(&rail_id) {
            rail.termination_epoch = Some(epoch);
        }
        let acct = self.account_entry(token, from);
        acct.lockup_rate = acct
            .lockup_rate
            .checked_sub(payment_rate)
            .ok_or(LedgerError::InvariantBroken("payer lockup rate accounting"))?;

        self.push_event(LedgerEvent::RailTerminated { rail_id, termination_epoch: epoch });
        log::info!("[RAIL_TERMINATE] rail_id={} caller={} epoch={}", rail_id, caller, epoch);
        Ok(())
    }
}
