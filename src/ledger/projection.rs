//! Read-only account projection
//!
//! Balance, inventory and coin history as shown to the account owner.
//! Pure reads of committed state: no unit of work, no locks.

use serde::Serialize;
use std::sync::Arc;

use super::LedgerError;
use crate::core_types::{AccountId, Coins};
use crate::models::EntryKind;
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub coins: Coins,
    pub inventory: Vec<InventoryItem>,
    pub coin_history: CoinHistory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryItem {
    #[serde(rename = "type")]
    pub item: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoinHistory {
    pub received: Vec<ReceivedCoins>,
    pub sent: Vec<SentCoins>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedCoins {
    pub from_user: String,
    pub amount: Coins,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentCoins {
    pub to_user: String,
    pub amount: Coins,
}

pub struct AccountQuery {
    store: Arc<dyn LedgerStore>,
}

impl AccountQuery {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn summary(&self, account_id: AccountId) -> Result<AccountSummary, LedgerError> {
        let account = self.store.account(account_id).await.map_err(|e| match e {
            StoreError::NotFound => LedgerError::AccountNotFound(account_id),
            other => LedgerError::store("info/balance", other),
        })?;

        let inventory = self
            .store
            .inventory(account_id)
            .await
            .map_err(LedgerError::during("info/inventory"))?
            .into_iter()
            .map(|line| InventoryItem {
                item: line.item,
                quantity: line.quantity,
            })
            .collect();

        let received = self
            .store
            .entries(account_id, EntryKind::Received)
            .await
            .map_err(LedgerError::during("info/received"))?
            .into_iter()
            .map(|e| ReceivedCoins {
                from_user: e.label,
                amount: e.amount,
            })
            .collect();

        let sent = self
            .store
            .entries(account_id, EntryKind::Sent)
            .await
            .map_err(LedgerError::during("info/sent"))?
            .into_iter()
            .map(|e| SentCoins {
                to_user: e.label,
                amount: e.amount,
            })
            .collect();

        Ok(AccountSummary {
            coins: account.balance,
            inventory,
            coin_history: CoinHistory { received, sent },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_json_shape() {
        let summary = AccountSummary {
            coins: 920,
            inventory: vec![InventoryItem {
                item: "t-shirt".to_string(),
                quantity: 1,
            }],
            coin_history: CoinHistory {
                received: vec![ReceivedCoins {
                    from_user: "bob".to_string(),
                    amount: 5,
                }],
                sent: vec![SentCoins {
                    to_user: "carol".to_string(),
                    amount: 7,
                }],
            },
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["coins"], 920);
        assert_eq!(json["inventory"][0]["type"], "t-shirt");
        assert_eq!(json["coinHistory"]["received"][0]["fromUser"], "bob");
        assert_eq!(json["coinHistory"]["sent"][0]["toUser"], "carol");
    }
}
