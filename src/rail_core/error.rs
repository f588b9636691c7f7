// Error types for the payment-rail ledger.
use std::fmt;

use crate::rail_core::types::{AddrId, Epoch, RailId, TokenId};

/// Reasons for rejecting a ledger command.
///
/// Every variant aborts the command that produced it; the dispatcher rolls
/// the touched state back so a failed command leaves the ledger untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // Authorization errors
    AuthorizationDenied { caller: AddrId, action: &'static str },

    // Missing entities
    RailMissing(RailId),
    AccountMissing { token: TokenId, owner: AddrId },
    ApprovalMissing { token: TokenId, payer: AddrId, operator: AddrId },
    ArbiterMissing(AddrId),

    // Lifecycle state errors
    RailInactive(RailId),
    AlreadyTerminated(RailId),
    TerminatedRailRestriction { rail_id: RailId, change: &'static str },

    // Operator approval errors
    OperatorNotApproved { token: TokenId, payer: AddrId, operator: AddrId },
    RateAllowanceExceeded { usage: u128, delta: u128, allowance: u128 },
    LockupAllowanceExceeded { usage: u128, delta: u128, allowance: u128 },

    // Funds and lockup errors
    InsufficientFunds { available: u128, required: u128 },
    InsufficientLockup { available: u128, required: u128 },
    LockupNotSettled { settled_upto: Epoch, required: Epoch },
    DebtBlocked { rail_id: RailId, settled_upto: Epoch, lockup_period: Epoch },

    // Arbiter errors
    ArbiterContractViolation(String),

    // Concurrency errors
    RailLocked(RailId),
    TokenOpInProgress,

    // Epoch errors
    EpochOutOfRange { epoch: Epoch, current: Epoch },

    // Internal consistency errors. These indicate a bookkeeping bug, not a
    // recoverable user condition.
    Arithmetic(&'static str),
    InvariantBroken(&'static str),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthorizationDenied { caller, action } => {
                write!(f, "Caller {} is not authorized to {}", caller, action)
            }
            Self::RailMissing(id) => write!(f, "Rail {} not found", id),
            Self::AccountMissing { token, owner } => {
                write!(f, "Account ({}, {}) not found", token, owner)
            }
            Self::ApprovalMissing { token, payer, operator } => {
                write!(
                    f,
                    "No operator approval for token {} payer {} operator {}",
                    token, payer, operator
                )
            }
            Self::ArbiterMissing(addr) => write!(f, "Arbiter {} is not registered", addr),
            Self::RailInactive(id) => write!(f, "Rail {} is inactive", id),
            Self::AlreadyTerminated(id) => write!(f, "Rail {} is already terminated", id),
            Self::TerminatedRailRestriction { rail_id, change } => {
                write!(f, "Rail {} is terminated: {} not allowed", rail_id, change)
            }
            Self::OperatorNotApproved { token, payer, operator } => {
                write!(
                    f,
                    "Operator {} is not approved by payer {} for token {}",
                    operator, payer, token
                )
            }
            Self::RateAllowanceExceeded { usage, delta, allowance } => {
                write!(
                    f,
                    "Rate allowance exceeded: usage {} + delta {} > allowance {}",
                    usage, delta, allowance
                )
            }
            Self::LockupAllowanceExceeded { usage, delta, allowance } => {
                write!(
                    f,
                    "Lockup allowance exceeded: usage {} + delta {} > allowance {}",
                    usage, delta, allowance
                )
            }
            Self::InsufficientFunds { available, required } => {
                write!(f, "Insufficient funds: have {}, need {}", available, required)
            }
            Self::InsufficientLockup { available, required } => {
                write!(f, "Insufficient lockup: have {}, need {}", available, required)
            }
            Self::LockupNotSettled { settled_upto, required } => {
                write!(
                    f,
                    "Account lockup settled only to epoch {}, need epoch {}",
                    settled_upto, required
                )
            }
            Self::DebtBlocked { rail_id, settled_upto, lockup_period } => {
                write!(
                    f,
                    "Rail {} is in debt (lockup settled to {}, period {})",
                    rail_id, settled_upto, lockup_period
                )
            }
            Self::ArbiterContractViolation(msg) => {
                write!(f, "Arbiter returned out-of-range values: {}", msg)
            }
            Self::RailLocked(id) => write!(f, "Rail {} has a modification in progress", id),
            Self::TokenOpInProgress => write!(f, "A token-moving command is already in progress"),
            Self::EpochOutOfRange { epoch, current } => {
                write!(f, "Epoch {} is out of range (current epoch {})", epoch, current)
            }
            Self::Arithmetic(ctx) => write!(f, "Arithmetic underflow/overflow in {}", ctx),
            Self::InvariantBroken(ctx) => write!(f, "Ledger invariant broken: {}", ctx),
        }
    }
}

impl std::error::Error for LedgerError {}

// Stable error code mapping for host-facing surfaces
impl LedgerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AuthorizationDenied { .. } => "AUTHORIZATION_DENIED",
            Self::RailMissing(_)
            | Self::AccountMissing { .. }
            | Self::ApprovalMissing { .. }
            | Self::ArbiterMissing(_) => "ENTITY_MISSING",
            Self::RailInactive(_) | Self::AlreadyTerminated(_) => "ENTITY_INACTIVE",
            Self::TerminatedRailRestriction { .. } => "TERMINATED_RAIL_RESTRICTION",
            Self::OperatorNotApproved { .. } => "OPERATOR_NOT_APPROVED",
            Self::RateAllowanceExceeded { .. } | Self::LockupAllowanceExceeded { .. } => {
                "ALLOWANCE_EXCEEDED"
            }
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::InsufficientLockup { .. } => "INSUFFICIENT_LOCKUP",
            Self::LockupNotSettled { .. } => "LOCKUP_NOT_SETTLED",
            Self::DebtBlocked { .. } => "DEBT_BLOCKED",
            Self::ArbiterContractViolation(_) => "ARBITER_CONTRACT_VIOLATION",
            Self::RailLocked(_) | Self::TokenOpInProgress => "CONCURRENT_MODIFICATION",
            Self::EpochOutOfRange { .. } => "EPOCH_OUT_OF_RANGE",
            Self::Arithmetic(_) => "ARITHMETIC",
            Self::InvariantBroken(_) => "INVARIANT_BROKEN",
        }
    }

    /// User-fixable conditions, as opposed to host misuse or internal bugs.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::OperatorNotApproved { .. }
                | Self::RateAllowanceExceeded { .. }
                | Self::LockupAllowanceExceeded { .. }
                | Self::InsufficientFunds { .. }
                | Self::InsufficientLockup { .. }
                | Self::LockupNotSettled { .. }
                | Self::DebtBlocked { .. }
                | Self::TerminatedRailRestriction { .. }
        )
    }

    /// Bookkeeping bugs; must never be silently recovered.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Arithmetic(_) | Self::InvariantBroken(_))
    }
}
