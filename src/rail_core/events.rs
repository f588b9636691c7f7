use serde::{Deserialize, Serialize};

use crate::rail_core::types::{AddrId, Epoch, RailId, TokenId};

/// State-change events appended in command order and drained by the host.
/// Events of a failed command are rolled back with the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// Lazy account creation on first contact
    AccountCreated {
        token: TokenId,
        owner: AddrId,
    },

    /// External deposit pulled through the vault
    Deposited {
        token: TokenId,
        to: AddrId,
        amount: u128,
    },

    /// External withdrawal pushed through the vault
    Withdrawn {
        token: TokenId,
        owner: AddrId,
        to: AddrId,
        amount: u128,
    },

    OperatorApproved {
        token: TokenId,
        payer: AddrId,
        operator: AddrId,
        rate_allowance: u128,
        lockup_allowance: u128,
        approved: bool,
    },

    OperatorTerminated {
        token: TokenId,
        payer: AddrId,
        operator: AddrId,
    },

    RailCreated {
        rail_id: RailId,
        token: TokenId,
        from: AddrId,
        to: AddrId,
        operator: AddrId,
        arbiter: Option<AddrId>,
    },

    RailLockupModified {
        rail_id: RailId,
        lockup_period: Epoch,
        lockup_fixed: u128,
    },

    RailPaymentModified {
        rail_id: RailId,
        old_rate: u128,
        new_rate: u128,
        one_time_payment: u128,
    },

    RailTerminated {
        rail_id: RailId,
        termination_epoch: Epoch,
    },

    /// Funds moved payer -> payee for settled epochs
    RailSettled {
        rail_id: RailId,
        amount: u128,
        settled_upto: Epoch,
    },

    /// Terminated rail fully settled; fixed lockup released, rail inactive
    RailFinalized {
        rail_id: RailId,
    },
}
