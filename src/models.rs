//! Ledger data models
//!
//! Rows of the three ledger tables plus the aggregate figures the auditor
//! reads back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::core_types::{AccountId, Coins};

/// Account row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub balance: Coins,
    /// Balance at creation time, the baseline of the conservation audit
    pub opening_balance: Coins,
    pub created_at: DateTime<Utc>,
}

/// Kind of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Sent,
    Received,
    Purchased,
}

impl EntryKind {
    /// Value stored in `ledger_entries.kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Sent => "sent",
            EntryKind::Received => "received",
            EntryKind::Purchased => "purchased",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EntryKind::Sent),
            "received" => Ok(EntryKind::Received),
            "purchased" => Ok(EntryKind::Purchased),
            _ => Err(format!("Invalid entry kind: {}", s)),
        }
    }
}

/// Entry staged inside a unit of work, before the store assigns id and
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Counterparty username for transfers, item identifier for purchases
    pub label: String,
    pub amount: Coins,
    /// Shared by the `sent`/`received` pair of one transfer
    pub transfer_ref: Option<Uuid>,
}

impl NewEntry {
    /// The two rows of one transfer, in the order they are appended.
    pub fn transfer_pair(
        transfer_ref: Uuid,
        from: (AccountId, &str),
        to: (AccountId, &str),
        amount: Coins,
    ) -> [NewEntry; 2] {
        [
            NewEntry {
                account_id: from.0,
                kind: EntryKind::Sent,
                label: to.1.to_string(),
                amount,
                transfer_ref: Some(transfer_ref),
            },
            NewEntry {
                account_id: to.0,
                kind: EntryKind::Received,
                label: from.1.to_string(),
                amount,
                transfer_ref: Some(transfer_ref),
            },
        ]
    }

    pub fn purchase(account_id: AccountId, item: &str, price: Coins) -> NewEntry {
        NewEntry {
            account_id,
            kind: EntryKind::Purchased,
            label: item.to_string(),
            amount: price,
            transfer_ref: None,
        }
    }
}

/// Committed, immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub label: String,
    pub amount: Coins,
    pub transfer_ref: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Inventory line, unique per (account, item)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryLine {
    pub account_id: AccountId,
    pub item: String,
    pub quantity: i64,
}

/// Store-wide figures for the invariant audit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    pub account_count: i64,
    pub balance_sum: Coins,
    pub opening_sum: Coins,
    pub purchased_sum: Coins,
    pub negative_balances: i64,
    /// Transfer refs without exactly one `sent` and one `received` of equal amount
    pub unpaired_transfers: i64,
    /// (account, item) pairs whose quantity differs from the purchase count
    pub inventory_mismatches: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_round_trip_str() {
        for kind in [EntryKind::Sent, EntryKind::Received, EntryKind::Purchased] {
            assert_eq!(EntryKind::from_str(kind.as_str()), Ok(kind));
        }
        assert!(EntryKind::from_str("SENT").is_err());
        assert!(EntryKind::from_str("refund").is_err());
    }

    #[test]
    fn test_transfer_pair_swaps_parties() {
        let r = Uuid::new_v4();
        let [sent, received] = NewEntry::transfer_pair(r, (1, "alice"), (2, "bob"), 500);

        assert_eq!(sent.account_id, 1);
        assert_eq!(sent.kind, EntryKind::Sent);
        assert_eq!(sent.label, "bob");

        assert_eq!(received.account_id, 2);
        assert_eq!(received.kind, EntryKind::Received);
        assert_eq!(received.label, "alice");

        assert_eq!(sent.amount, received.amount);
        assert_eq!(sent.transfer_ref, Some(r));
        assert_eq!(received.transfer_ref, Some(r));
    }

    #[test]
    fn test_purchase_entry_has_no_transfer_ref() {
        let e = NewEntry::purchase(7, "cup", 20);
        assert_eq!(e.kind, EntryKind::Purchased);
        assert_eq!(e.label, "cup");
        assert_eq!(e.amount, 20);
        assert!(e.transfer_ref.is_none());
    }

    #[test]
    fn test_entry_kind_serde_lowercase() {
        let json = serde_json::to_string(&EntryKind::Purchased).unwrap();
        assert_eq!(json, "\"purchased\"");
    }
}
