//! Rail ledger core - the payment-rail state machine.
//!
//! Deterministic, single-threaded bookkeeping: payers fund prepaid
//! balances, approved operators run payment rails at a fixed rate per
//! epoch, and settlement moves funds once epochs elapse. Everything is a
//! pure function of the command stream and the externally supplied epoch.

pub mod account;
pub mod approval;
pub mod arbiter;
pub mod audit;
pub mod core;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod rail;
pub mod settlement;
pub mod types;
pub mod vault;

// Re-exports
pub use account::{Account, LockupSettlement};
pub use approval::OperatorApproval;
pub use arbiter::{Arbiter, ArbitrationDecision, ArbitrationRequest, IdentityArbiter};
pub use audit::AuditFinding;
pub use self::core::PaymentLedger;
pub use error::LedgerError;
pub use events::LedgerEvent;
pub use rail::{Rail, RateChange, RateChangeQueue};
pub use settlement::SettlementResult;
pub use types::{AddrId, Epoch, RailId, TokenId};
pub use vault::{NullVault, TokenVault, VaultError};
