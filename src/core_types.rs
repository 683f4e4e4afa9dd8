//! Core types used throughout the ledger
//!
//! Plain aliases over the integer columns of the store. They give the
//! signatures semantic meaning without a conversion layer at the sqlx seam.

/// Account ID - primary key of `accounts`, assigned by the store.
///
/// # Constraints:
/// - **Immutable**: never reassigned, accounts are never deleted
/// - **Ordered**: lock acquisition follows ascending `AccountId`
pub type AccountId = i64;

/// Whole coins. The ledger has no fractional unit.
///
/// Signed so that deltas (`-price`, `+amount`) share the column type;
/// persisted balances are never negative.
pub type Coins = i64;
