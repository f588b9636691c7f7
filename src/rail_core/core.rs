//! PaymentLedger - the command dispatcher and account authority.
//!
//! A single-threaded, in-memory state machine driven by a totally ordered
//! command stream tagged with a non-decreasing epoch. No mutex: external
//! submitter concurrency is serialized by the host before commands reach
//! the ledger.
//!
//! Every mutating command is transactional: the dispatcher captures the
//! entries the command may touch and restores them on any error, so a
//! failed command leaves the ledger exactly as it was.

use std::collections::HashMap;

use crate::rail_core::account::{Account, LockupSettlement};
use crate::rail_core::approval::OperatorApproval;
use crate::rail_core::arbiter::Arbiter;
use crate::rail_core::error::LedgerError;
use crate::rail_core::events::LedgerEvent;
use crate::rail_core::rail::Rail;
use crate::rail_core::types::{AddrId, Epoch, RailId, TokenId};
use crate::rail_core::vault::{TokenVault, VaultError};

/// Main ledger struct. Generic over the token vault seam so hosts plug in
/// their custody layer; tests use the mock vault.
pub struct PaymentLedger<V: TokenVault> {
    // State
    pub(crate) current_epoch: Epoch,
    pub(crate) accounts: HashMap<(TokenId, AddrId), Account>,
    pub(crate) rails: HashMap<RailId, Rail>,
    pub(crate) approvals: HashMap<(TokenId, AddrId, AddrId), OperatorApproval>,
    pub(crate) client_operator_rails: HashMap<(AddrId, AddrId), Vec<RailId>>,
    pub(crate) next_rail_id: RailId,

    // Host-registered collaborators
    pub(crate) arbiters: HashMap<AddrId, Box<dyn Arbiter>>,
    pub(crate) vault: V,

    // Reentrancy guard for token-moving commands
    in_token_op: bool,

    // Event sink, drained by the host
    events: Vec<LedgerEvent>,
}

/// Undo record for one command's scope. Entries are restored verbatim;
/// absent entries are removed again.
pub(crate) struct Snapshot {
    accounts: Vec<((TokenId, AddrId), Option<Account>)>,
    rails: Vec<(RailId, Option<Rail>)>,
    approvals: Vec<((TokenId, AddrId, AddrId), Option<OperatorApproval>)>,
    events_len: usize,
}

impl<V: TokenVault> PaymentLedger<V> {
    pub fn new(vault: V) -> Self {
        Self {
            current_epoch: 0,
            accounts: HashMap::new(),
            rails: HashMap::new(),
            approvals: HashMap::new(),
            client_operator_rails: HashMap::new(),
            next_rail_id: 0,
            arbiters: HashMap::new(),
            vault,
            in_token_op: false,
            events: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Epoch and host wiring
    // ------------------------------------------------------------------

    pub fn current_epoch(&self) -> Epoch {
        self.current_epoch
    }

    /// Move logical time forward. Commands always execute at the current
    /// epoch; the host advances it between blocks of commands.
    pub fn advance_epoch(&mut self, epoch: Epoch) -> Result<(), LedgerError> {
        if epoch < self.current_epoch {
            return Err(LedgerError::EpochOutOfRange { epoch, current: self.current_epoch });
        }
        self.current_epoch = epoch;
        Ok(())
    }

    /// Register an arbiter implementation under its address. Rails refer to
    /// arbiters by address only.
    pub fn register_arbiter(&mut self, addr: AddrId, arbiter: Box<dyn Arbiter>) {
        self.arbiters.insert(addr, arbiter);
    }

    pub fn unregister_arbiter(&mut self, addr: AddrId) {
        self.arbiters.remove(&addr);
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn account(&self, token: TokenId, owner: AddrId) -> Option<&Account> {
        self.accounts.get(&(token, owner))
    }

    pub fn rail(&self, rail_id: RailId) -> Option<&Rail> {
        self.rails.get(&rail_id)
    }

    pub fn approval(
        &self,
        token: TokenId,
        payer: AddrId,
        operator: AddrId,
    ) -> Option<&OperatorApproval> {
        self.approvals.get(&(token, payer, operator))
    }

    /// Rail ids ever created by `operator` drawing on `payer`, in creation
    /// order. Finalized rails stay listed.
    pub fn rails_of(&self, payer: AddrId, operator: AddrId) -> &[RailId] {
        self.client_operator_rails.get(&(payer, operator)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn drain_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    // ------------------------------------------------------------------
    // Operator approvals
    // ------------------------------------------------------------------

    /// Grant (or re-grant) an operator the right to create and modify rails
    /// drawing on the caller's balance, up to the given allowances.
    pub fn approve_operator(
        &mut self,
        caller: AddrId,
        token: TokenId,
        operator: AddrId,
        rate_allowance: u128,
        lockup_allowance: u128,
    ) -> Result<(), LedgerError> {
        self.set_operator_approval(caller, token, operator, true, rate_allowance, lockup_allowance)
    }

    /// As `approve_operator` with an explicit approval flag. Usage counters
    /// are preserved across updates.
    pub fn set_operator_approval(
        &mut self,
        caller: AddrId,
        token: TokenId,
        operator: AddrId,
        approved: bool,
        rate_allowance: u128,
        lockup_allowance: u128,
    ) -> Result<(), LedgerError> {
        let entry = self.approvals.entry((token, caller, operator)).or_default();
        entry.is_approved = approved;
        entry.rate_allowance = rate_allowance;
        entry.lockup_allowance = lockup_allowance;
        self.events.push(LedgerEvent::OperatorApproved {
            token,
            payer: caller,
            operator,
            rate_allowance,
            lockup_allowance,
            approved,
        });
        Ok(())
    }

    /// Zero the operator's allowances and clear the approval flag. Rails
    /// already created keep settling under their recorded terms.
    pub fn terminate_operator(
        &mut self,
        caller: AddrId,
        token: TokenId,
        operator: AddrId,
    ) -> Result<(), LedgerError> {
        let entry = self
            .approvals
            .get_mut(&(token, caller, operator))
            .ok_or(LedgerError::ApprovalMissing { token, payer: caller, operator })?;
        entry.terminate();
        self.events.push(LedgerEvent::OperatorTerminated { token, payer: caller, operator });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deposit / withdraw
    // ------------------------------------------------------------------

    /// Pull `amount` of `token` from the caller through the vault and
    /// credit it to `to`'s account. Any caller may fund any account.
    pub fn deposit(
        &mut self,
        caller: AddrId,
        token: TokenId,
        to: AddrId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        self.begin_token_op()?;
        let result = self.deposit_inner(caller, token, to, amount);
        self.end_token_op();
        result
    }

    fn deposit_inner(
        &mut self,
        caller: AddrId,
        token: TokenId,
        to: AddrId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        let snap = self.capture(&[(token, to)], &[], &[]);
        let result = self.deposit_apply(caller, token, to, amount);
        if result.is_err() {
            self.restore(snap);
        }
        result
    }

    fn deposit_apply(
        &mut self,
        caller: AddrId,
        token: TokenId,
        to: AddrId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        // Validate the credit before pulling so a vault transfer is never
        // stranded by a failed credit.
        let new_funds = self
            .account_entry(token, to)
            .funds
            .checked_add(amount)
            .ok_or(LedgerError::Arithmetic("deposit credit"))?;

        if amount > 0 {
            self.vault.pull(token, caller, amount).map_err(vault_to_ledger)?;
        }

        let acct = self.account_entry(token, to);
        acct.funds = new_funds;
        self.events.push(LedgerEvent::Deposited { token, to, amount });

        // Fold any deferred lockup into the fresh funds immediately.
        self.settle_account_lockup(token, to)?;
        Ok(())
    }

    /// Withdraw to the caller's own external balance.
    pub fn withdraw(
        &mut self,
        caller: AddrId,
        token: TokenId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        self.withdraw_to(caller, token, caller, amount)
    }

    /// Withdraw unreserved funds from the caller's account, pushing tokens
    /// to `to`. Requires the account fully settled to the current epoch.
    pub fn withdraw_to(
        &mut self,
        caller: AddrId,
        token: TokenId,
        to: AddrId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        self.begin_token_op()?;
        let result = self.withdraw_inner(caller, token, to, amount);
        self.end_token_op();
        result
    }

    fn withdraw_inner(
        &mut self,
        caller: AddrId,
        token: TokenId,
        to: AddrId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        let snap = self.capture(&[(token, caller)], &[], &[]);
        let result = self.withdraw_apply(caller, token, to, amount);
        if result.is_err() {
            self.restore(snap);
        }
        result
    }

    fn withdraw_apply(
        &mut self,
        caller: AddrId,
        token: TokenId,
        to: AddrId,
        amount: u128,
    ) -> Result<(), LedgerError> {
        if !self.accounts.contains_key(&(token, caller)) {
            return Err(LedgerError::AccountMissing { token, owner: caller });
        }

        let settlement = self.settle_account_lockup(token, caller)?;
        if !settlement.fully_settled || settlement.settled_upto != self.current_epoch {
            return Err(LedgerError::LockupNotSettled {
                settled_upto: settlement.settled_upto,
                required: self.current_epoch,
            });
        }

        let acct = self
            .accounts
            .get_mut(&(token, caller))
            .ok_or(LedgerError::AccountMissing { token, owner: caller })?;
        let available = acct
            .funds
            .checked_sub(acct.lockup_current)
            .ok_or(LedgerError::InvariantBroken("lockup exceeds funds"))?;
        if amount > available {
            return Err(LedgerError::InsufficientFunds { available, required: amount });
        }
        acct.funds -= amount;
        self.events.push(LedgerEvent::Withdrawn { token, owner: caller, to, amount });

        // Push last: nothing after this point can fail.
        if amount > 0 {
            self.vault.push(token, to, amount).map_err(vault_to_ledger)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internal plumbing shared with lifecycle and settlement
    // ------------------------------------------------------------------

    /// Lazily create and return the (token, owner) account. The lockup
    /// cursor of a fresh account starts at the current epoch.
    pub(crate) fn account_entry(&mut self, token: TokenId, owner: AddrId) -> &mut Account {
        let epoch = self.current_epoch;
        if !self.accounts.contains_key(&(token, owner)) {
            self.events.push(LedgerEvent::AccountCreated { token, owner });
        }
        self.accounts.entry((token, owner)).or_insert_with(|| Account::new(epoch))
    }

    /// Run the lockup settler on an account; logs underfunded accounts.
    pub(crate) fn settle_account_lockup(
        &mut self,
        token: TokenId,
        owner: AddrId,
    ) -> Result<LockupSettlement, LedgerError> {
        let epoch = self.current_epoch;
        let acct = self.account_entry(token, owner);
        let out = acct.settle_lockup(epoch)?;
        if !out.fully_settled {
            log::warn!(
                "UNDERFUNDED: token={} owner={} settled_upto={} current_epoch={}",
                token,
                owner,
                out.settled_upto,
                epoch
            );
        }
        Ok(out)
    }

    pub(crate) fn push_event(&mut self, event: LedgerEvent) {
        self.events.push(event);
    }

    pub(crate) fn begin_token_op(&mut self) -> Result<(), LedgerError> {
        if self.in_token_op {
            return Err(LedgerError::TokenOpInProgress);
        }
        self.in_token_op = true;
        Ok(())
    }

    pub(crate) fn end_token_op(&mut self) {
        self.in_token_op = false;
    }

    /// Capture the given entries for rollback.
    pub(crate) fn capture(
        &self,
        accounts: &[(TokenId, AddrId)],
        rails: &[RailId],
        approvals: &[(TokenId, AddrId, AddrId)],
    ) -> Snapshot {
        Snapshot {
            accounts: accounts.iter().map(|k| (*k, self.accounts.get(k).cloned())).collect(),
            rails: rails.iter().map(|id| (*id, self.rails.get(id).cloned())).collect(),
            approvals: approvals.iter().map(|k| (*k, self.approvals.get(k).cloned())).collect(),
            events_len: self.events.len(),
        }
    }

    pub(crate) fn restore(&mut self, snap: Snapshot) {
        for (key, value) in snap.accounts {
            match value {
                Some(acct) => {
                    self.accounts.insert(key, acct);
                }
                None => {
                    self.accounts.remove(&key);
                }
            }
        }
        for (rail_id, value) in snap.rails {
            match value {
                Some(rail) => {
                    self.rails.insert(rail_id, rail);
                }
                None => {
                    self.rails.remove(&rail_id);
                }
            }
        }
        for (key, value) in snap.approvals {
            match value {
                Some(approval) => {
                    self.approvals.insert(key, approval);
                }
                None => {
                    self.approvals.remove(&key);
                }
            }
        }
        self.events.truncate(snap.events_len);
    }

    /// Run `f` with the rail's modification lock held and its scope
    /// (payer/payee accounts, the rail, the operator approval) captured for
    /// rollback. Error paths restore the scope, which also clears the lock.
    pub(crate) fn with_rail_lock<T>(
        &mut self,
        rail_id: RailId,
        f: impl FnOnce(&mut Self) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let snap = self.capture_rail_scope(rail_id)?;
        if let Some(rail) = self.rails.get_mut(&rail_id) {
            rail.is_locked = true;
        }
        match f(self) {
            Ok(value) => {
                if let Some(rail) = self.rails.get_mut(&rail_id) {
                    rail.is_locked = false;
                }
                Ok(value)
            }
            Err(err) => {
                self.restore(snap);
                Err(err)
            }
        }
    }

    /// Snapshot of everything a rail command may touch. Fails fast when the
    /// rail is missing or another modification is in progress.
    pub(crate) fn capture_rail_scope(&self, rail_id: RailId) -> Result<Snapshot, LedgerError> {
        let rail = self.rails.get(&rail_id).ok_or(LedgerError::RailMissing(rail_id))?;
        if rail.is_locked {
            return Err(LedgerError::RailLocked(rail_id));
        }
        Ok(self.capture(
            &[(rail.token, rail.from), (rail.token, rail.to)],
            &[rail_id],
            &[(rail.token, rail.from, rail.operator)],
        ))
    }
}

fn vault_to_ledger(err: VaultError) -> LedgerError {
    match err {
        VaultError::InsufficientBalance { available, required, .. } => {
            LedgerError::InsufficientFunds { available, required }
        }
        VaultError::Rejected(msg) => LedgerError::InvariantBroken(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rail_core::vault::NullVault;

    #[test]
    fn test_deposit_creates_account_lazily() {
        let mut ledger = PaymentLedger::new(NullVault);
        ledger.deposit(1, 1, 1, 1000).unwrap();
        let acct = ledger.account(1, 1).unwrap();
        assert_eq!(acct.funds, 1000);
        assert_eq!(acct.lockup_current, 0);
    }

    #[test]
    fn test_deposit_withdraw_round_trip() {
        let mut ledger = PaymentLedger::new(NullVault);
        ledger.deposit(1, 1, 1, 500).unwrap();
        ledger.withdraw(1, 1, 500).unwrap();
        let acct = ledger.account(1, 1).unwrap();
        assert_eq!(acct.funds, 0);
        assert_eq!(acct.lockup_current, 0);
    }

    #[test]
    fn test_withdraw_from_missing_account() {
        let mut ledger = PaymentLedger::new(NullVault);
        let err = ledger.withdraw(9, 1, 10).unwrap_err();
        assert_eq!(err, LedgerError::AccountMissing { token: 1, owner: 9 });
    }

    #[test]
    fn test_withdraw_more_than_available() {
        let mut ledger = PaymentLedger::new(NullVault);
        ledger.deposit(1, 1, 1, 100).unwrap();
        let err = ledger.withdraw(1, 1, 101).unwrap_err();
        assert_eq!(err, LedgerError::InsufficientFunds { available: 100, required: 101 });
        // rollback left the balance alone
        assert_eq!(ledger.account(1, 1).unwrap().funds, 100);
    }

    #[test]
    fn test_advance_epoch_monotonic() {
        let mut ledger = PaymentLedger::new(NullVault);
        ledger.advance_epoch(5).unwrap();
        ledger.advance_epoch(5).unwrap();
        let err = ledger.advance_epoch(4).unwrap_err();
        assert_eq!(err.error_code(), "EPOCH_OUT_OF_RANGE");
        assert_eq!(ledger.current_epoch(), 5);
    }

    #[test]
    fn test_terminate_operator_requires_existing_approval() {
        let mut ledger = PaymentLedger::new(NullVault);
        let err = ledger.terminate_operator(1, 1, 2).unwrap_err();
        assert_eq!(err.error_code(), "ENTITY_MISSING");

        ledger.approve_operator(1, 1, 2, 10, 100).unwrap();
        ledger.terminate_operator(1, 1, 2).unwrap();
        let approval = ledger.approval(1, 1, 2).unwrap();
        assert!(!approval.is_approved);
        assert_eq!(approval.rate_allowance, 0);
        assert_eq!(approval.lockup_allowance, 0);
    }

    #[test]
    fn test_token_op_guard_blocks_nested_commands() {
        let mut ledger = PaymentLedger::new(NullVault);
        ledger.begin_token_op().unwrap();
        let err = ledger.deposit(1, 1, 1, 10).unwrap_err();
        assert_eq!(err, LedgerError::TokenOpInProgress);
        ledger.end_token_op();
        ledger.deposit(1, 1, 1, 10).unwrap();
    }

    #[test]
    fn test_events_emitted_in_order() {
        let mut ledger = PaymentLedger::new(NullVault);
        ledger.deposit(1, 1, 1, 10).unwrap();
        let events = ledger.drain_events();
        assert_eq!(
            events,
            vec![
                LedgerEvent::AccountCreated { token: 1, owner: 1 },
                LedgerEvent::Deposited { token: 1, to: 1, amount: 10 },
            ]
        );
        assert!(ledger.drain_events().is_empty());
    }
}
