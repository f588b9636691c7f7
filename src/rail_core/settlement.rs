//! Rail settlement: advancing `settled_up_to` and moving funds.
//!
//! Settlement walks the rail's historical rate segments in order, consults
//! the arbiter per segment, and transfers the (possibly reduced) amount
//! from payer to payee while releasing the matching lockup. The target
//! epoch is capped by the payer's funded lockup horizon and, for
//! terminated rails, by the termination grace window.

use crate::rail_core::arbiter::{ArbitrationDecision, ArbitrationRequest};
use crate::rail_core::error::LedgerError;
use crate::rail_core::events::LedgerEvent;
use crate::rail_core::types::{AddrId, Epoch, RailId};
use crate::rail_core::vault::TokenVault;

use super::core::PaymentLedger;

/// Outcome of a settlement command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementResult {
    /// Funds transferred payer -> payee by this call.
    pub total_settled: u128,
    /// The rail's settlement cursor after the call.
    pub final_epoch: Epoch,
    pub note: String,
}

impl<V: TokenVault> PaymentLedger<V> {
    /// Settle a rail through `until_epoch` (capped by the current epoch).
    ///
    /// Anyone may settle; settlement is idempotent and only ever moves the
    /// cursor forward. `skip_arbitration` bypasses the rail's arbiter and
    /// is restricted to the payer, the party whose funds the arbiter would
    /// have protected from over-settlement.
    pub fn settle_rail(
        &mut self,
        caller: AddrId,
        rail_id: RailId,
        until_epoch: Epoch,
        skip_arbitration: bool,
    ) -> Result<SettlementResult, LedgerError> {
        self.begin_token_op()?;
        let result = self.with_rail_lock(rail_id, |ledger| {
            ledger.settle_rail_guarded(caller, rail_id, until_epoch, skip_arbitration)
        });
        self.end_token_op();
        result
    }

    /// Settle each rail through the current epoch with arbitration. One
    /// failure aborts and rolls back the whole batch.
    pub fn settle_rail_batch(
        &mut self,
        caller: AddrId,
        rail_ids: &[RailId],
    ) -> Result<Vec<SettlementResult>, LedgerError> {
        self.begin_token_op()?;
        log::info!("[SETTLE_BATCH] caller={} rails={}", caller, rail_ids.len());

        let epoch = self.current_epoch;
        let mut results = Vec::with_capacity(rail_ids.len());
        let mut snaps = Vec::with_capacity(rail_ids.len());
        let mut failure = None;

        for &rail_id in rail_ids {
            let snap = match self.capture_rail_scope(rail_id) {
                Ok(snap) => snap,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };
            if let Some(rail) = self.rails.get_mut(&rail_id) {
                rail.is_locked = true;
            }
            match self.settle_rail_inner(rail_id, epoch, false) {
                Ok(result) => {
                    if let Some(rail) = self.rails.get_mut(&rail_id) {
                        rail.is_locked = false;
                    }
                    snaps.push(snap);
                    results.push(result);
                }
                Err(err) => {
                    self.restore(snap);
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // Unwind earlier rails too: the batch is one command.
            for snap in snaps.into_iter().rev() {
                self.restore(snap);
            }
            self.end_token_op();
            return Err(err);
        }
        self.end_token_op();
        Ok(results)
    }

    fn settle_rail_guarded(
        &mut self,
        caller: AddrId,
        rail_id: RailId,
        until_epoch: Epoch,
        skip_arbitration: bool,
    ) -> Result<SettlementResult, LedgerError> {
        if until_epoch > self.current_epoch {
            return Err(LedgerError::EpochOutOfRange {
                epoch: until_epoch,
                current: self.current_epoch,
            });
        }
        if skip_arbitration {
            let payer = self
                .rails
                .get(&rail_id)
                .map(|r| r.from)
                .ok_or(LedgerError::RailMissing(rail_id))?;
            if caller != payer {
                return Err(LedgerError::AuthorizationDenied {
                    caller,
                    action: "settle without arbitration",
                });
            }
        }
        self.settle_rail_inner(rail_id, until_epoch, skip_arbitration)
    }

    /// Settlement body, shared with `modify_rail_payment`'s forced
    /// settlement. Assumes the caller holds the rail scope for rollback.
    pub(crate) fn settle_rail_inner(
        &mut self,
        rail_id: RailId,
        until_epoch: Epoch,
        skip_arbitration: bool,
    ) -> Result<SettlementResult, LedgerError> {
        let rail = self.rails.get(&rail_id).ok_or(LedgerError::RailMissing(rail_id))?;
        let (token, from, to) = (rail.token, rail.from, rail.to);
        let payment_rate = rail.payment_rate;
        let lockup_period = rail.lockup_period;
        let arbiter = rail.arbiter;
        let settled_up_to = rail.settled_up_to;
        let max_term = rail.max_settlement_epoch();
        let queue_empty = rail.rate_queue.is_empty();

        if !rail.is_active {
            return Ok(SettlementResult {
                total_settled: 0,
                final_epoch: settled_up_to,
                note: "inactive rail".to_string(),
            });
        }

        let mut until = until_epoch;
        if let Some(max_term) = max_term {
            if settled_up_to >= max_term {
                return self.finalize_rail(rail_id);
            }
            until = until.min(max_term);
        }

        // Lockup must be current before any settlement decision.
        let lockup = self.settle_account_lockup(token, from)?;
        let lockup_horizon = lockup.settled_upto.saturating_add(lockup_period);
        let target = until.min(lockup_horizon);

        if settled_up_to >= target {
            return Ok(SettlementResult {
                total_settled: 0,
                final_epoch: settled_up_to,
                note: "already settled".to_string(),
            });
        }

        if payment_rate == 0 && queue_empty {
            if let Some(rail) = self.rails.get_mut(&rail_id) {
                rail.settled_up_to = target;
            }
            self.push_event(LedgerEvent::RailSettled { rail_id, amount: 0, settled_upto: target });
            return Ok(SettlementResult {
                total_settled: 0,
                final_epoch: target,
                note: "zero rate".to_string(),
            });
        }

        let mut processed = settled_up_to;
        let mut total: u128 = 0;
        let mut note = None;

        while processed < target {
            let head = self
                .rails
                .get(&rail_id)
                .ok_or(LedgerError::RailMissing(rail_id))?
                .rate_queue
                .peek()
                .copied();

            let (segment_end, segment_rate, queue_boundary) = match head {
                Some(entry) => {
                    if entry.until_epoch < processed {
                        return Err(LedgerError::InvariantBroken(
                            "rate queue behind settlement cursor",
                        ));
                    }
                    if entry.until_epoch == processed {
                        // Spent boundary; the segment it covered is settled.
                        if let Some(rail) = self.rails.get_mut(&rail_id) {
                            rail.rate_queue.dequeue();
                        }
                        continue;
                    }
                    let end = target.min(entry.until_epoch);
                    let boundary = (entry.until_epoch <= target).then_some(entry.until_epoch);
                    (end, entry.rate, boundary)
                }
                None => {
                    if payment_rate == 0 {
                        if let Some(rail) = self.rails.get_mut(&rail_id) {
                            rail.settled_up_to = target;
                        }
                        processed = target;
                        note = Some("zero rate".to_string());
                        break;
                    }
                    (target, payment_rate, None)
                }
            };

            let span = segment_end - processed;
            let proposed = segment_rate
                .checked_mul(u128::from(span))
                .ok_or(LedgerError::Arithmetic("segment amount"))?;

            let decision = match (arbiter, skip_arbitration) {
                (Some(addr), false) => {
                    let request = ArbitrationRequest {
                        rail_id,
                        proposed_amount: proposed,
                        from_epoch: processed,
                        to_epoch: segment_end,
                    };
                    let verdict = self
                        .arbiters
                        .get(&addr)
                        .ok_or(LedgerError::ArbiterMissing(addr))?
                        .arbitrate(&request);
                    self.validate_arbitration(&request, &verdict, segment_rate)?;
                    log::debug!(
                        "[ARBITRATE] rail_id={} segment=[{}, {}] proposed={} modified={} upto={}",
                        rail_id,
                        processed,
                        segment_end,
                        proposed,
                        verdict.modified_amount,
                        verdict.settle_upto
                    );
                    verdict
                }
                _ => ArbitrationDecision {
                    modified_amount: proposed,
                    settle_upto: segment_end,
                    note: String::new(),
                },
            };

            let amount = decision.modified_amount;
            {
                let payer = self
                    .accounts
                    .get_mut(&(token, from))
                    .ok_or(LedgerError::AccountMissing { token, owner: from })?;
                if payer.funds < amount {
                    return Err(LedgerError::InsufficientFunds {
                        available: payer.funds,
                        required: amount,
                    });
                }
                if payer.lockup_current < amount {
                    return Err(LedgerError::InsufficientLockup {
                        available: payer.lockup_current,
                        required: amount,
                    });
                }
                payer.funds -= amount;
                payer.lockup_current -= amount;
            }
            {
                let payee = self.account_entry(token, to);
                payee.funds = payee
                    .funds
                    .checked_add(amount)
                    .ok_or(LedgerError::Arithmetic("settlement credit"))?;
            }
            if let Some(rail) = self.rails.get_mut(&rail_id) {
                rail.settled_up_to = decision.settle_upto;
            }
            total = total
                .checked_add(amount)
                .ok_or(LedgerError::Arithmetic("settlement total"))?;
            if !decision.note.is_empty() {
                note = Some(decision.note.clone());
            }

            if decision.settle_upto == processed {
                // Arbiter granted no progress; stop with what is settled.
                break;
            }
            if decision.settle_upto < segment_end {
                // Partial segment: keep the queue head for the remainder.
                break;
            }
            if queue_boundary == Some(segment_end) {
                if let Some(rail) = self.rails.get_mut(&rail_id) {
                    rail.rate_queue.dequeue();
                }
            }
            processed = segment_end;
        }

        let final_epoch = self
            .rails
            .get(&rail_id)
            .map(|r| r.settled_up_to)
            .ok_or(LedgerError::RailMissing(rail_id))?;
        self.push_event(LedgerEvent::RailSettled { rail_id, amount: total, settled_upto: final_epoch });
        log::info!(
            "[SETTLE] rail_id={} amount={} settled_upto={}",
            rail_id,
            total,
            final_epoch
        );
        Ok(SettlementResult {
            total_settled: total,
            final_epoch,
            note: note.unwrap_or_else(|| "settled".to_string()),
        })
    }

    fn validate_arbitration(
        &self,
        request: &ArbitrationRequest,
        verdict: &ArbitrationDecision,
        segment_rate: u128,
    ) -> Result<(), LedgerError> {
        if verdict.settle_upto < request.from_epoch || verdict.settle_upto > request.to_epoch {
            return Err(LedgerError::ArbiterContractViolation(format!(
                "settle_upto {} outside [{}, {}]",
                verdict.settle_upto, request.from_epoch, request.to_epoch
            )));
        }
        let span = verdict.settle_upto - request.from_epoch;
        let cap = segment_rate
            .checked_mul(u128::from(span))
            .ok_or(LedgerError::Arithmetic("arbitration cap"))?;
        if verdict.modified_amount > cap {
            return Err(LedgerError::ArbiterContractViolation(format!(
                "amount {} exceeds {} for the settled span",
                verdict.modified_amount, cap
            )));
        }
        Ok(())
    }

    /// Release the fixed lockup of a fully settled terminated rail and
    /// retire it. Finalized rails stay queryable but accept no commands.
    fn finalize_rail(&mut self, rail_id: RailId) -> Result<SettlementResult, LedgerError> {
        let rail = self.rails.get(&rail_id).ok_or(LedgerError::RailMissing(rail_id))?;
        let (token, from) = (rail.token, rail.from);
        let lockup_fixed = rail.lockup_fixed;
        let settled_up_to = rail.settled_up_to;

        let acct = self.account_entry(token, from);
        acct.lockup_current = acct
            .lockup_current
            .checked_sub(lockup_fixed)
            .ok_or(LedgerError::InvariantBroken("fixed lockup exceeds account lockup"))?;

        if let Some(rail) = self.rails.get_mut(&rail_id) {
            rail.lockup_fixed = 0;
            rail.payment_rate = 0;
            rail.is_active = false;
        }
        self.push_event(LedgerEvent::RailFinalized { rail_id });
        log::info!("[RAIL_FINALIZE] rail_id={} settled_upto={}", rail_id, settled_up_to);
        Ok(SettlementResult {
            total_settled: 0,
            final_epoch: settled_up_to,
            note: "finalized".to_string(),
        })
    }
}
