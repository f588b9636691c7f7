//! Rail records and the per-rail rate-change queue.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::rail_core::types::{AddrId, Epoch, TokenId};

/// One historical rate segment: `rate` was in force from the previous
/// boundary up to and including `until_epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateChange {
    pub rate: u128,
    pub until_epoch: Epoch,
}

/// FIFO of historical rate segments.
///
/// Callers keep `until_epoch` weakly increasing in insertion order and the
/// head at or ahead of the rail's settlement cursor; the settlement engine
/// treats a violation as a broken invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateChangeQueue {
    entries: VecDeque<RateChange>,
}

impl RateChangeQueue {
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    pub fn enqueue(&mut self, rate: u128, until_epoch: Epoch) {
        self.entries.push_back(RateChange { rate, until_epoch });
    }

    pub fn dequeue(&mut self) -> Option<RateChange> {
        self.entries.pop_front()
    }

    pub fn peek(&self) -> Option<&RateChange> {
        self.entries.front()
    }

    /// Most recently enqueued entry.
    pub fn newest(&self) -> Option<&RateChange> {
        self.entries.back()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RateChange> {
        self.entries.iter()
    }
}

/// A unidirectional continuous payment commitment from `from` to `to`,
/// managed by `operator`, optionally adjudicated by `arbiter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rail {
    pub token: TokenId,
    pub from: AddrId,
    pub to: AddrId,
    pub operator: AddrId,
    pub arbiter: Option<AddrId>,

    /// Funds per epoch from `from` to `to`.
    pub payment_rate: u128,
    /// Future epochs of `payment_rate` that must stay locked.
    pub lockup_period: Epoch,
    /// Non-rate-driven locked amount (one-time payments, security deposit).
    pub lockup_fixed: u128,

    /// Epoch through which settlement has transferred funds.
    pub settled_up_to: Epoch,
    /// `None` while active; the epoch termination was requested otherwise.
    pub termination_epoch: Option<Epoch>,
    pub rate_queue: RateChangeQueue,

    pub is_active: bool,
    /// Modification-in-progress flag; guards arbiter re-entry.
    pub is_locked: bool,
}

impl Rail {
    pub fn new(
        token: TokenId,
        from: AddrId,
        to: AddrId,
        operator: AddrId,
        arbiter: Option<AddrId>,
        current_epoch: Epoch,
    ) -> Self {
        Self {
            token,
            from,
            to,
            operator,
            arbiter,
            payment_rate: 0,
            lockup_period: 0,
            lockup_fixed: 0,
            settled_up_to: current_epoch,
            termination_epoch: None,
            rate_queue: RateChangeQueue::new(),
            is_active: true,
            is_locked: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.termination_epoch.is_some()
    }

    /// For terminated rails, the epoch beyond which no further settlement
    /// happens: `termination_epoch + lockup_period`.
    pub fn max_settlement_epoch(&self) -> Option<Epoch> {
        self.termination_epoch.map(|t| t.saturating_add(self.lockup_period))
    }

    /// True once a terminated rail has been settled through its grace
    /// window and the next settlement pass will finalize it.
    pub fn ready_to_finalize(&self) -> bool {
        match self.max_settlement_epoch() {
            Some(max_term) => self.is_active && self.settled_up_to >= max_term,
            None => false,
        }
    }

    /// Counts a rail toward its payer's `lockup_rate`.
    pub fn accrues_lockup(&self) -> bool {
        self.is_active && !self.is_terminated()
    }
}
