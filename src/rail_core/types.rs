//! Scalar aliases shared across the ledger.
//!
//! Principals (payers, payees, operators, arbiters) are opaque addresses
//! supplied by the host; the ledger never interprets them.

/// Externally supplied logical time. Monotonically non-decreasing.
pub type Epoch = u64;

/// Token identifier. Token transfer itself lives behind the vault seam.
pub type TokenId = u32;

/// Opaque principal address.
pub type AddrId = u64;

/// Globally unique rail identifier, monotonically assigned.
pub type RailId = u64;
