//! Catalog purchases

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{LedgerError, conclude};
use crate::catalog::Catalog;
use crate::core_types::{AccountId, Coins};
use crate::models::NewEntry;
use crate::store::{LedgerStore, StoreError, UnitOfWork};

/// Purchase payload as decoded by the HTTP layer
#[derive(Debug, Clone, Deserialize)]
pub struct BuyItemRequest {
    pub item: String,
}

/// Result of a committed purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseReceipt {
    pub item: String,
    pub price: Coins,
    pub balance_after: Coins,
    /// Inventory quantity of this item after the purchase
    pub quantity: i64,
}

pub struct PurchaseService {
    store: Arc<dyn LedgerStore>,
    catalog: Arc<Catalog>,
}

impl PurchaseService {
    pub fn new(store: Arc<dyn LedgerStore>, catalog: Arc<Catalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn buy(
        &self,
        actor: AccountId,
        req: &BuyItemRequest,
    ) -> Result<PurchaseReceipt, LedgerError> {
        self.buy_item(actor, &req.item).await
    }

    /// Buy one unit of `item` for the actor
    ///
    /// Unknown items are rejected from the catalog alone, without opening a
    /// unit of work.
    pub async fn buy_item(
        &self,
        actor: AccountId,
        item: &str,
    ) -> Result<PurchaseReceipt, LedgerError> {
        let Some(price) = self.catalog.price(item) else {
            debug!(actor, item, "Purchase rejected: unknown item");
            return Err(LedgerError::ItemNotFound(item.to_string()));
        };

        let mut uow = self
            .store
            .begin()
            .await
            .map_err(LedgerError::during("purchase/begin"))?;
        let outcome = Self::apply(uow.as_mut(), actor, item, price).await;
        let receipt = conclude(uow, outcome, "purchase/commit").await.inspect_err(|e| {
            debug!(actor, item, price, code = e.code(), "Purchase failed");
        })?;

        info!(
            actor,
            item,
            price,
            quantity = receipt.quantity,
            "Purchase committed"
        );
        Ok(receipt)
    }

    async fn apply(
        uow: &mut dyn UnitOfWork,
        actor: AccountId,
        item: &str,
        price: Coins,
    ) -> Result<PurchaseReceipt, LedgerError> {
        let balance = uow.lock_balance(actor).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::AccountNotFound(actor),
            other => LedgerError::store("purchase/lock_balance", other),
        })?;

        if balance < price {
            return Err(LedgerError::InsufficientFunds {
                available: balance,
                requested: price,
            });
        }

        uow.adjust_balance(actor, -price)
            .await
            .map_err(LedgerError::during("purchase/debit"))?;
        uow.append_entries(&[NewEntry::purchase(actor, item, price)])
            .await
            .map_err(LedgerError::during("purchase/append_entry"))?;
        let quantity = uow
            .add_inventory(actor, item)
            .await
            .map_err(LedgerError::during("purchase/add_inventory"))?;

        Ok(PurchaseReceipt {
            item: item.to_string(),
            price,
            balance_after: balance - price,
            quantity,
        })
    }
}
