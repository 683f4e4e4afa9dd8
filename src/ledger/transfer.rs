//! Coin transfers
//!
//! Moves coins from the acting account to another account and records the
//! movement on both sides (`sent` + `received`) in the same commit.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{LedgerError, conclude};
use crate::core_types::{AccountId, Coins};
use crate::models::NewEntry;
use crate::store::{LedgerStore, StoreError, UnitOfWork};

/// Transfer payload as decoded by the HTTP layer
#[derive(Debug, Clone, Deserialize)]
pub struct SendCoinRequest {
    #[serde(rename = "toUser", alias = "ToUser")]
    pub to_user: String,
    pub amount: Coins,
}

/// Result of a committed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    /// Shared by the `sent` and `received` entries
    pub transfer_ref: Uuid,
    pub from: String,
    pub to: String,
    pub amount: Coins,
    /// Sender balance after the debit
    pub balance_after: Coins,
}

pub struct TransferService {
    store: Arc<dyn LedgerStore>,
}

impl TransferService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn send(
        &self,
        actor: AccountId,
        req: &SendCoinRequest,
    ) -> Result<TransferReceipt, LedgerError> {
        self.send_coins(actor, &req.to_user, req.amount).await
    }

    /// Transfer `amount` coins from `actor` to the account named `to_username`
    ///
    /// # Errors
    /// - `InvalidAmount` for `amount <= 0`, before the store is touched
    /// - `CounterpartyNotFound` if `to_username` does not exist
    /// - `SelfTransfer` if it names the actor, regardless of balance
    /// - `InsufficientFunds` if the locked balance is below `amount`
    /// - `Busy` / `Storage` on store failure
    pub async fn send_coins(
        &self,
        actor: AccountId,
        to_username: &str,
        amount: Coins,
    ) -> Result<TransferReceipt, LedgerError> {
        debug!(actor, to = %to_username, amount, "Transfer requested");

        if amount <= 0 {
            debug!(actor, amount, "Transfer rejected: non-positive amount");
            return Err(LedgerError::InvalidAmount(amount));
        }

        let mut uow = self
            .store
            .begin()
            .await
            .map_err(LedgerError::during("transfer/begin"))?;
        let outcome = Self::apply(uow.as_mut(), actor, to_username, amount).await;
        let receipt = conclude(uow, outcome, "transfer/commit").await.inspect_err(|e| {
            debug!(actor, to = %to_username, amount, code = e.code(), "Transfer failed");
        })?;

        info!(
            transfer_ref = %receipt.transfer_ref,
            from = %receipt.from,
            to = %receipt.to,
            amount,
            "Transfer committed"
        );
        Ok(receipt)
    }

    async fn apply(
        uow: &mut dyn UnitOfWork,
        actor: AccountId,
        to_username: &str,
        amount: Coins,
    ) -> Result<TransferReceipt, LedgerError> {
        // 1. Resolve recipient (non-locking)
        let target = uow
            .account_id_by_username(to_username)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => LedgerError::CounterpartyNotFound(to_username.to_string()),
                other => LedgerError::store("transfer/resolve_recipient", other),
            })?;

        // 2. Sender name for the recipient's history
        let from_username = uow.username_of(actor).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::AccountNotFound(actor),
            other => LedgerError::store("transfer/resolve_sender", other),
        })?;

        // 3. Self-transfer
        if target == actor {
            return Err(LedgerError::SelfTransfer);
        }

        // 4. Lock both rows in ascending id order: no circular wait with B -> A
        let (low, high) = if actor < target {
            (actor, target)
        } else {
            (target, actor)
        };
        let low_balance = uow
            .lock_balance(low)
            .await
            .map_err(LedgerError::during("transfer/lock_balance"))?;
        let high_balance = uow
            .lock_balance(high)
            .await
            .map_err(LedgerError::during("transfer/lock_balance"))?;
        let available = if low == actor { low_balance } else { high_balance };

        // 5. Solvency
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        // 6. Debit / credit
        uow.adjust_balance(actor, -amount)
            .await
            .map_err(LedgerError::during("transfer/debit"))?;
        uow.adjust_balance(target, amount)
            .await
            .map_err(LedgerError::during("transfer/credit"))?;

        // 7. Double-entry history, one append
        let transfer_ref = Uuid::new_v4();
        let entries =
            NewEntry::transfer_pair(transfer_ref, (actor, &from_username), (target, to_username), amount);
        uow.append_entries(&entries)
            .await
            .map_err(LedgerError::during("transfer/append_entries"))?;

        Ok(TransferReceipt {
            transfer_ref,
            from: from_username,
            to: to_username.to_string(),
            amount,
            balance_after: available - amount,
        })
    }
}
