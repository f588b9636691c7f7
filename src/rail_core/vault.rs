//! Token vault seam.
//!
//! The ledger never holds tokens itself; it instructs an external vault to
//! pull deposits in and push withdrawals out. Internal transfers between
//! accounts are pure bookkeeping and never touch the vault.

use std::fmt;

use crate::rail_core::types::{AddrId, TokenId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    InsufficientBalance { token: TokenId, owner: AddrId, available: u128, required: u128 },
    Rejected(&'static str),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientBalance { token, owner, available, required } => write!(
                f,
                "Vault balance too low for token {} owner {}: have {}, need {}",
                token, owner, available, required
            ),
            Self::Rejected(msg) => write!(f, "Vault rejected transfer: {}", msg),
        }
    }
}

impl std::error::Error for VaultError {}

pub trait TokenVault {
    /// Move `amount` of `token` from `from`'s external balance into the
    /// ledger's custody.
    fn pull(&mut self, token: TokenId, from: AddrId, amount: u128) -> Result<(), VaultError>;

    /// Move `amount` of `token` from the ledger's custody to `to`.
    fn push(&mut self, token: TokenId, to: AddrId, amount: u128) -> Result<(), VaultError>;
}

/// Vault stub for embedding the ledger where token custody is handled
/// elsewhere; accepts every transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVault;

impl TokenVault for NullVault {
    fn pull(&mut self, _token: TokenId, _from: AddrId, _amount: u128) -> Result<(), VaultError> {
        Ok(())
    }

    fn push(&mut self, _token: TokenId, _to: AddrId, _amount: u128) -> Result<(), VaultError> {
        Ok(())
    }
}
