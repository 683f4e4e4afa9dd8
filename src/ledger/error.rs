//! Ledger Error Types

use thiserror::Error;

use crate::core_types::{AccountId, Coins};
use crate::store::StoreError;

/// Outcome of a rejected or failed ledger operation
///
/// Every variant is returned only after the unit of work (if one was
/// opened) has been rolled back.
#[derive(Error, Debug)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero, got {0}")]
    InvalidAmount(Coins),

    #[error("Unable to send coins to yourself")]
    SelfTransfer,

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),

    // === State Errors ===
    #[error("Not enough coins: available {available}, requested {requested}")]
    InsufficientFunds { available: Coins, requested: Coins },

    #[error("Recipient not found: {0}")]
    CounterpartyNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    // === System Errors ===
    #[error("{op}: store busy, retry later ({source})")]
    Busy {
        op: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl LedgerError {
    /// Wrap a store failure with the operation it interrupted
    pub fn store(op: &'static str, source: StoreError) -> Self {
        if source.is_busy() {
            LedgerError::Busy { op, source }
        } else {
            LedgerError::Storage { op, source }
        }
    }

    /// `map_err` adapter for [`LedgerError::store`]
    pub fn during(op: &'static str) -> impl FnOnce(StoreError) -> Self {
        move |source| Self::store(op, source)
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            LedgerError::InvalidUsername(_) => "INVALID_USERNAME",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CounterpartyNotFound(_) => "COUNTERPARTY_NOT_FOUND",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::Busy { .. } => "BUSY",
            LedgerError::Storage { .. } => "STORAGE_FAILURE",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidAmount(_)
            | LedgerError::SelfTransfer
            | LedgerError::ItemNotFound(_)
            | LedgerError::InvalidUsername(_) => 400,
            LedgerError::CounterpartyNotFound(_) | LedgerError::AccountNotFound(_) => 404,
            LedgerError::InsufficientFunds { .. } => 422,
            LedgerError::Storage { .. } => 500,
            LedgerError::Busy { .. } => 503,
        }
    }

    /// Rejected on its merits; retrying the same request cannot succeed
    /// without a change in state.
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_busy_becomes_busy() {
        let err = LedgerError::store("transfer/lock", StoreError::Busy("lock timeout".into()));
        assert!(matches!(err, LedgerError::Busy { op: "transfer/lock", .. }));
        assert_eq!(err.http_status(), 503);
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_store_failure_keeps_context() {
        let err = LedgerError::store("purchase/commit", StoreError::Invariant("boom".into()));
        assert_eq!(err.code(), "STORAGE_FAILURE");
        assert_eq!(err.http_status(), 500);
        assert!(err.to_string().starts_with("purchase/commit: "));
    }

    #[test]
    fn test_client_errors() {
        for err in [
            LedgerError::InvalidAmount(0),
            LedgerError::SelfTransfer,
            LedgerError::ItemNotFound("yacht".into()),
            LedgerError::InsufficientFunds {
                available: 1,
                requested: 2,
            },
            LedgerError::CounterpartyNotFound("ghost".into()),
        ] {
            assert!(err.is_client_error(), "{} should be a client error", err.code());
        }
    }
}
