//! Account opening
//!
//! The authentication layer calls [`AccountService::open`] after verifying
//! credentials; an unknown username gets a fresh account with the starting
//! balance.

use std::sync::Arc;
use tracing::{debug, info};

use super::LedgerError;
use crate::core_types::Coins;
use crate::models::Account;
use crate::store::{LedgerStore, StoreError};

/// Longest username accepted
const MAX_USERNAME_LEN: usize = 64;

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    starting_balance: Coins,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, starting_balance: Coins) -> Self {
        Self {
            store,
            starting_balance,
        }
    }

    /// Existing account for `username`, or a new one
    pub async fn open(&self, username: &str) -> Result<Account, LedgerError> {
        if username.trim().is_empty()
            || username.len() > MAX_USERNAME_LEN
            || username.chars().any(char::is_control)
        {
            return Err(LedgerError::InvalidUsername(username.to_string()));
        }

        match self.store.account_by_username(username).await {
            Ok(account) => return Ok(account),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(LedgerError::store("accounts/lookup", e)),
        }

        match self
            .store
            .create_account(username, self.starting_balance)
            .await
        {
            Ok(account) => {
                info!(
                    account_id = account.id,
                    username,
                    balance = account.balance,
                    "Account opened"
                );
                Ok(account)
            }
            // Lost the race to a concurrent first login
            Err(StoreError::Duplicate(_)) => {
                debug!(username, "Account created concurrently, re-reading");
                self.store
                    .account_by_username(username)
                    .await
                    .map_err(LedgerError::during("accounts/reread"))
            }
            Err(e) => Err(LedgerError::store("accounts/create", e)),
        }
    }
}
