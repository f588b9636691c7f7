//! Whole-state invariant reconciliation.
//!
//! Sweeps every account and rail and reports anything inconsistent instead
//! of panicking, so hosts and tests can audit after arbitrary command
//! streams. An empty report means the ledger is consistent.

use std::collections::HashMap;

use crate::rail_core::core::PaymentLedger;
use crate::rail_core::types::{AddrId, TokenId};
use crate::rail_core::vault::TokenVault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFinding {
    pub entity: String,
    pub message: String,
}

impl AuditFinding {
    fn new(entity: String, message: String) -> Self {
        Self { entity, message }
    }
}

/// Check I1-I3, the queue ordering rules, and the epoch bounds.
pub fn check<V: TokenVault>(ledger: &PaymentLedger<V>) -> Vec<AuditFinding> {
    let mut findings = Vec::new();
    let epoch = ledger.current_epoch;

    // Expected lockup rates from the rail table (I2).
    let mut expected_rates: HashMap<(TokenId, AddrId), u128> = HashMap::new();
    for rail in ledger.rails.values() {
        if rail.accrues_lockup() {
            *expected_rates.entry((rail.token, rail.from)).or_default() += rail.payment_rate;
        }
    }

    for (&(token, owner), acct) in &ledger.accounts {
        let entity = format!("account ({}, {})", token, owner);
        if acct.lockup_current > acct.funds {
            findings.push(AuditFinding::new(
                entity.clone(),
                format!("lockup {} exceeds funds {}", acct.lockup_current, acct.funds),
            ));
        }
        if acct.lockup_last_settled_at > epoch {
            findings.push(AuditFinding::new(
                entity.clone(),
                format!(
                    "lockup cursor {} ahead of current epoch {}",
                    acct.lockup_last_settled_at, epoch
                ),
            ));
        }
        let expected = expected_rates.remove(&(token, owner)).unwrap_or(0);
        if acct.lockup_rate != expected {
            findings.push(AuditFinding::new(
                entity,
                format!("lockup rate {} but rails sum to {}", acct.lockup_rate, expected),
            ));
        }
    }
    // Rails whose payer account never materialized still owe a rate of 0.
    for ((token, owner), expected) in expected_rates {
        if expected != 0 {
            findings.push(AuditFinding::new(
                format!("account ({}, {})", token, owner),
                format!("missing account but rails sum to rate {}", expected),
            ));
        }
    }

    for (&rail_id, rail) in &ledger.rails {
        let entity = format!("rail {}", rail_id);
        if rail.settled_up_to > epoch {
            findings.push(AuditFinding::new(
                entity.clone(),
                format!("settled_up_to {} ahead of current epoch {}", rail.settled_up_to, epoch),
            ));
        }
        if let Some(max_term) = rail.max_settlement_epoch() {
            if rail.settled_up_to > max_term {
                findings.push(AuditFinding::new(
                    entity.clone(),
                    format!(
                        "settled_up_to {} beyond termination window {}",
                        rail.settled_up_to, max_term
                    ),
                ));
            }
        }
        let mut prev = None;
        for entry in rail.rate_queue.iter() {
            if entry.until_epoch < rail.settled_up_to {
                findings.push(AuditFinding::new(
                    entity.clone(),
                    format!(
                        "queue entry until {} behind settlement cursor {}",
                        entry.until_epoch, rail.settled_up_to
                    ),
                ));
            }
            if let Some(prev) = prev {
                if entry.until_epoch < prev {
                    findings.push(AuditFinding::new(
                        entity.clone(),
                        format!("queue boundaries not monotone: {} after {}", entry.until_epoch, prev),
                    ));
                }
            }
            prev = Some(entry.until_epoch);
        }
    }

    findings
}
