/// Mock token vault for testing
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::rail_core::types::{AddrId, TokenId};
use crate::rail_core::vault::{TokenVault, VaultError};

/// In-memory vault tracking external balances plus the ledger's custody
/// balance per token. Clones share state, so tests keep a handle while the
/// ledger owns another.
#[derive(Clone, Default)]
pub struct MockVault {
    balances: Arc<Mutex<HashMap<(TokenId, AddrId), u128>>>,
    custody: Arc<Mutex<HashMap<TokenId, u128>>>,
}

impl MockVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set initial external balance for testing
    pub fn set_balance(&self, token: TokenId, owner: AddrId, balance: u128) {
        self.balances.lock().unwrap().insert((token, owner), balance);
    }

    pub fn balance_of(&self, token: TokenId, owner: AddrId) -> u128 {
        *self.balances.lock().unwrap().get(&(token, owner)).unwrap_or(&0)
    }

    /// Tokens currently held on behalf of the ledger.
    pub fn custody_of(&self, token: TokenId) -> u128 {
        *self.custody.lock().unwrap().get(&token).unwrap_or(&0)
    }

    /// External balances plus custody; constant under any command stream.
    pub fn total_supply(&self, token: TokenId) -> u128 {
        let external: u128 = self
            .balances
            .lock()
            .unwrap()
            .iter()
            .filter(|((t, _), _)| *t == token)
            .map(|(_, amount)| *amount)
            .sum();
        external + self.custody_of(token)
    }
}

impl TokenVault for MockVault {
    fn pull(&mut self, token: TokenId, from: AddrId, amount: u128) -> Result<(), VaultError> {
        let mut balances = self.balances.lock().unwrap();
        let available = *balances.get(&(token, from)).unwrap_or(&0);
        if available < amount {
            return Err(VaultError::InsufficientBalance {
                token,
                owner: from,
                available,
                required: amount,
            });
        }
        balances.insert((token, from), available - amount);
        drop(balances);

        let mut custody = self.custody.lock().unwrap();
        let held = custody.entry(token).or_insert(0);
        *held = held.checked_add(amount).ok_or(VaultError::Rejected("custody overflow"))?;
        Ok(())
    }

    fn push(&mut self, token: TokenId, to: AddrId, amount: u128) -> Result<(), VaultError> {
        let mut custody = self.custody.lock().unwrap();
        let held = custody.entry(token).or_insert(0);
        if *held < amount {
            return Err(VaultError::Rejected("custody underflow"));
        }
        *held -= amount;
        drop(custody);

        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry((token, to)).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(VaultError::Rejected("balance overflow"))?;
        Ok(())
    }
}
