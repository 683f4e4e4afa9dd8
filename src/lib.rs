//! coin_ledger - transactional coin ledger for an internal merch shop
//!
//! Every employee account holds a coin balance. Coins move between
//! accounts (transfers) or leave the system in exchange for catalog items
//! (purchases). Each balance change is an atomic unit of work against the
//! ledger store, recorded in an append-only entry log.
//!
//! # Modules
//!
//! - [`core_types`] - Account id and coin amount aliases
//! - [`models`] - Accounts, entries, inventory lines
//! - [`catalog`] - Fixed item price table
//! - [`store`] - Ledger store trait, PostgreSQL and in-memory backends
//! - [`ledger`] - Transfer, purchase, account and audit services
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool

// Core types - must be first!
pub mod core_types;

pub mod catalog;
pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod store;

// Convenient re-exports at crate root
pub use catalog::Catalog;
pub use core_types::{AccountId, Coins};
pub use ledger::{
    AccountQuery, AccountService, AuditReport, LedgerAuditor, LedgerError, PurchaseService,
    TransferService,
};
pub use models::{Account, EntryKind, InventoryLine, LedgerEntry};
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore, StoreError, UnitOfWork};
