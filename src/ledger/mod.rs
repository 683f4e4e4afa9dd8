//! Ledger engines
//!
//! Balance-changing operations over a [`LedgerStore`]. Each call runs
//! in exactly one unit of work:
//!
//! ```text
//! validate ──▶ begin ──▶ resolve ──▶ lock ──▶ check ──▶ write ──▶ commit
//!    │                      │          │         │         │
//!    ▼                      └──────────┴─────────┴─────────┴──▶ rollback ──▶ Err
//!   Err (store untouched)
//! ```
//!
//! - [`TransferService`] - coin transfer between two accounts, double-entry history
//! - [`PurchaseService`] - catalog purchase: debit, history, inventory upsert
//! - [`AccountService`] - find-or-create used on first login
//! - [`AccountQuery`] - non-locking balance/inventory/history projection
//! - [`LedgerAuditor`] - invariant check over the whole store
//!
//! [`LedgerStore`]: crate::store::LedgerStore

pub mod accounts;
pub mod audit;
pub mod error;
pub mod projection;
pub mod purchase;
pub mod transfer;


pub use accounts::AccountService;
pub use audit::{AuditReport, LedgerAuditor};
pub use error::LedgerError;
pub use projection::{AccountQuery, AccountSummary};
pub use purchase::{BuyItemRequest, PurchaseReceipt, PurchaseService};
pub use transfer::{SendCoinRequest, TransferReceipt, TransferService};

use tracing::warn;

use crate::store::UnitOfWork;

/// Commit on success, roll back on failure.
///
/// The rollback error (if any) is logged and the original error returned;
/// the store discards the unit of work either way.
pub(crate) async fn conclude<T>(
    uow: Box<dyn UnitOfWork>,
    outcome: Result<T, LedgerError>,
    commit_op: &'static str,
) -> Result<T, LedgerError> {
    match outcome {
        Ok(value) => {
            uow.commit().await.map_err(LedgerError::during(commit_op))?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = uow.rollback().await {
                warn!(op = commit_op, error = %rb, "Rollback failed");
            }
            Err(e)
        }
    }
}
