//! Ledger Store
//!
//! Durable state behind the engines: account balances, inventory lines and
//! the append-only entry log.
//!
//! # Unit of Work
//!
//! Every balance-changing request runs inside one [`UnitOfWork`] obtained
//! from [`LedgerStore::begin`]:
//!
//! ```text
//! begin ─▶ resolve ─▶ lock_balance ─▶ adjust / append / add_inventory ─▶ commit
//!               │             │                       │
//!               └─────────────┴──────── error ────────┴──▶ rollback
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Lock-Before-Write**: a balance or inventory line is only mutated by
//!    the unit of work holding the account's locking read
//! 2. **Bounded Wait**: a locking read that cannot be granted within the
//!    configured timeout fails with [`StoreError::Busy`]
//! 3. **All-or-Nothing**: an uncommitted unit of work leaves no trace, also
//!    when it is simply dropped
//! 4. **Append-Only History**: entries are inserted, never updated or deleted

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::StoreError;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;

use crate::core_types::{AccountId, Coins};
use crate::models::{Account, EntryKind, InventoryLine, LedgerEntry, LedgerTotals, NewEntry};

/// Entry point to the ledger state
///
/// Reads on this trait are non-locking projections of committed state.
/// All mutation of existing accounts goes through [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open a new unit of work
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Insert a new account with its opening balance
    ///
    /// Returns [`StoreError::Duplicate`] if the username is taken.
    async fn create_account(&self, username: &str, opening_balance: Coins)
    -> Result<Account, StoreError>;

    async fn account(&self, account_id: AccountId) -> Result<Account, StoreError>;

    async fn account_by_username(&self, username: &str) -> Result<Account, StoreError>;

    /// Inventory of one account, ordered by item
    async fn inventory(&self, account_id: AccountId) -> Result<Vec<InventoryLine>, StoreError>;

    /// Entries of one kind for one account, oldest first
    async fn entries(
        &self,
        account_id: AccountId,
        kind: EntryKind,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Store-wide figures for the invariant audit
    async fn totals(&self) -> Result<LedgerTotals, StoreError>;
}

/// One atomic sequence of reads and writes
///
/// Drop without [`UnitOfWork::commit`] discards all staged changes and
/// releases every lock.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Non-locking lookup of an account id
    async fn account_id_by_username(&mut self, username: &str) -> Result<AccountId, StoreError>;

    /// Non-locking lookup of an account's username
    async fn username_of(&mut self, account_id: AccountId) -> Result<String, StoreError>;

    /// Locking read of a balance
    ///
    /// Blocks other units of work locking the same account until this one
    /// ends, for at most the configured lock timeout.
    async fn lock_balance(&mut self, account_id: AccountId) -> Result<Coins, StoreError>;

    /// Add `delta` to a balance previously locked by this unit of work
    async fn adjust_balance(&mut self, account_id: AccountId, delta: Coins)
    -> Result<(), StoreError>;

    /// Append entries as one multi-row write
    async fn append_entries(&mut self, entries: &[NewEntry]) -> Result<(), StoreError>;

    /// Increment the (account, item) inventory line, creating it at 1.
    /// Returns the new quantity.
    async fn add_inventory(&mut self, account_id: AccountId, item: &str)
    -> Result<i64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
