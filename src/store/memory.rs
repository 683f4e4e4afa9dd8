//! In-memory Ledger Store
//!
//! Same contract as the PostgreSQL store, for tests and database-less runs.
//!
//! Row locks are per-account `tokio::sync::Mutex`es kept in a `DashMap`;
//! a unit of work holds the owned guards of every account it locked until
//! it commits or is dropped. Writes are staged in the unit of work and
//! applied under the state write lock at commit, so readers never observe
//! half of a commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LedgerStore, StoreError, UnitOfWork};
use crate::core_types::{AccountId, Coins};
use crate::models::{Account, EntryKind, InventoryLine, LedgerEntry, LedgerTotals, NewEntry};

#[derive(Debug, Clone)]
struct AccountRow {
    username: String,
    balance: Coins,
    opening_balance: Coins,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn to_account(&self, id: AccountId) -> Account {
        Account {
            id,
            username: self.username.clone(),
            balance: self.balance,
            opening_balance: self.opening_balance,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    accounts: BTreeMap<AccountId, AccountRow>,
    usernames: FxHashMap<String, AccountId>,
    /// Keyed by (account, item): one line per pair
    inventory: BTreeMap<(AccountId, String), i64>,
    entries: Vec<LedgerEntry>,
}

impl MemoryState {
    fn balance(&self, account_id: AccountId) -> Result<Coins, StoreError> {
        self.accounts
            .get(&account_id)
            .map(|a| a.balance)
            .ok_or(StoreError::NotFound)
    }
}

struct Shared {
    state: RwLock<MemoryState>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

/// In-memory ledger store
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(MemoryState::default()),
                row_locks: DashMap::new(),
                lock_timeout,
            }),
        }
    }

    /// Total number of committed entries
    pub async fn entry_count(&self) -> usize {
        self.shared.state.read().await.entries.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            held: BTreeMap::new(),
            balance_deltas: BTreeMap::new(),
            inventory_deltas: BTreeMap::new(),
            entries: Vec::new(),
        }))
    }

    async fn create_account(
        &self,
        username: &str,
        opening_balance: Coins,
    ) -> Result<Account, StoreError> {
        if opening_balance < 0 {
            return Err(StoreError::Constraint("accounts_opening_balance_check".to_string()));
        }

        let mut state = self.shared.state.write().await;
        if state.usernames.contains_key(username) {
            return Err(StoreError::Duplicate("accounts_username_key".to_string()));
        }

        let id = state.accounts.keys().next_back().copied().unwrap_or(0) + 1;
        let row = AccountRow {
            username: username.to_string(),
            balance: opening_balance,
            opening_balance,
            created_at: Utc::now(),
        };
        let account = row.to_account(id);
        state.accounts.insert(id, row);
        state.usernames.insert(username.to_string(), id);
        Ok(account)
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, StoreError> {
        let state = self.shared.state.read().await;
        state
            .accounts
            .get(&account_id)
            .map(|row| row.to_account(account_id))
            .ok_or(StoreError::NotFound)
    }

    async fn account_by_username(&self, username: &str) -> Result<Account, StoreError> {
        let state = self.shared.state.read().await;
        let id = *state.usernames.get(username).ok_or(StoreError::NotFound)?;
        state
            .accounts
            .get(&id)
            .map(|row| row.to_account(id))
            .ok_or(StoreError::NotFound)
    }

    async fn inventory(&self, account_id: AccountId) -> Result<Vec<InventoryLine>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .inventory
            .range((account_id, String::new())..)
            .take_while(|((owner, _), _)| *owner == account_id)
            .map(|((owner, item), quantity)| InventoryLine {
                account_id: *owner,
                item: item.clone(),
                quantity: *quantity,
            })
            .collect())
    }

    async fn entries(
        &self,
        account_id: AccountId,
        kind: EntryKind,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.shared.state.read().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.account_id == account_id && e.kind == kind)
            .cloned()
            .collect())
    }

    async fn totals(&self) -> Result<LedgerTotals, StoreError> {
        let state = self.shared.state.read().await;

        let mut totals = LedgerTotals {
            account_count: state.accounts.len() as i64,
            ..LedgerTotals::default()
        };
        for row in state.accounts.values() {
            totals.balance_sum += row.balance;
            totals.opening_sum += row.opening_balance;
            if row.balance < 0 {
                totals.negative_balances += 1;
            }
        }

        // transfer_ref -> (sent count, received count, amounts)
        let mut pairs: HashMap<Uuid, (u32, u32, Vec<Coins>)> = HashMap::new();
        let mut purchases: BTreeMap<(AccountId, &str), i64> = BTreeMap::new();
        for e in &state.entries {
            match (e.kind, e.transfer_ref) {
                (EntryKind::Purchased, _) => {
                    totals.purchased_sum += e.amount;
                    *purchases.entry((e.account_id, e.label.as_str())).or_default() += 1;
                }
                (EntryKind::Sent, Some(r)) => {
                    let p = pairs.entry(r).or_default();
                    p.0 += 1;
                    p.2.push(e.amount);
                }
                (EntryKind::Received, Some(r)) => {
                    let p = pairs.entry(r).or_default();
                    p.1 += 1;
                    p.2.push(e.amount);
                }
                // transfer row without a ref can never be paired
                (EntryKind::Sent | EntryKind::Received, None) => totals.unpaired_transfers += 1,
            }
        }
        totals.unpaired_transfers += pairs
            .values()
            .filter(|(sent, received, amounts)| {
                *sent != 1 || *received != 1 || amounts.windows(2).any(|w| w[0] != w[1])
            })
            .count() as i64;

        for ((account_id, item), quantity) in &state.inventory {
            let bought = purchases.remove(&(*account_id, item.as_str())).unwrap_or(0);
            if bought != *quantity {
                totals.inventory_mismatches += 1;
            }
        }
        // purchases with no inventory line at all
        totals.inventory_mismatches += purchases.len() as i64;

        Ok(totals)
    }
}

/// Staged unit of work over the in-memory state
pub struct MemoryUnitOfWork {
    shared: Arc<Shared>,
    held: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    balance_deltas: BTreeMap<AccountId, Coins>,
    inventory_deltas: BTreeMap<(AccountId, String), i64>,
    entries: Vec<NewEntry>,
}

impl MemoryUnitOfWork {
    fn ensure_locked(&self, account_id: AccountId, what: &str) -> Result<(), StoreError> {
        if self.held.contains_key(&account_id) {
            Ok(())
        } else {
            Err(StoreError::Invariant(format!(
                "{} of account {} without holding its lock",
                what, account_id
            )))
        }
    }

    fn staged_delta(&self, account_id: AccountId) -> Coins {
        self.balance_deltas.get(&account_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn account_id_by_username(&mut self, username: &str) -> Result<AccountId, StoreError> {
        let state = self.shared.state.read().await;
        state
            .usernames
            .get(username)
            .copied()
            .ok_or(StoreError::NotFound)
    }

    async fn username_of(&mut self, account_id: AccountId) -> Result<String, StoreError> {
        let state = self.shared.state.read().await;
        state
            .accounts
            .get(&account_id)
            .map(|a| a.username.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn lock_balance(&mut self, account_id: AccountId) -> Result<Coins, StoreError> {
        if !self.held.contains_key(&account_id) {
            self.shared.state.read().await.balance(account_id)?;

            let row_lock = self
                .shared
                .row_locks
                .entry(account_id)
                .or_default()
                .value()
                .clone();

            let guard = tokio::time::timeout(self.shared.lock_timeout, row_lock.lock_owned())
                .await
                .map_err(|_| {
                    warn!(account_id, "Locking balance read timed out");
                    StoreError::Busy(format!(
                        "lock on account {} not granted within {:?}",
                        account_id, self.shared.lock_timeout
                    ))
                })?;
            self.held.insert(account_id, guard);
        }

        // Committed value is stable while we hold the lock
        let committed = self.shared.state.read().await.balance(account_id)?;
        let balance = committed + self.staged_delta(account_id);
        debug!(account_id, balance, "Balance locked");
        Ok(balance)
    }

    async fn adjust_balance(&mut self, account_id: AccountId, delta: Coins) -> Result<(), StoreError> {
        self.ensure_locked(account_id, "balance update")?;

        let committed = self.shared.state.read().await.balance(account_id)?;
        let staged = self
            .staged_delta(account_id)
            .checked_add(delta)
            .ok_or_else(|| StoreError::Constraint("balance overflow".to_string()))?;
        match committed.checked_add(staged) {
            Some(after) if after >= 0 => {
                self.balance_deltas.insert(account_id, staged);
                Ok(())
            }
            Some(_) => Err(StoreError::Constraint("accounts_balance_check".to_string())),
            None => Err(StoreError::Constraint("balance overflow".to_string())),
        }
    }

    async fn append_entries(&mut self, entries: &[NewEntry]) -> Result<(), StoreError> {
        if let Some(bad) = entries.iter().find(|e| e.amount <= 0) {
            return Err(StoreError::Constraint(format!(
                "ledger_entries_amount_check: {}",
                bad.amount
            )));
        }
        self.entries.extend_from_slice(entries);
        Ok(())
    }

    async fn add_inventory(&mut self, account_id: AccountId, item: &str) -> Result<i64, StoreError> {
        self.ensure_locked(account_id, "inventory update")?;

        let key = (account_id, item.to_string());
        let committed = self
            .shared
            .state
            .read()
            .await
            .inventory
            .get(&key)
            .copied()
            .unwrap_or(0);
        let staged = self.inventory_deltas.entry(key).or_insert(0);
        *staged += 1;
        Ok(committed + *staged)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.shared.state.write().await;

        // Validate everything before the first write
        for (account_id, delta) in &this.balance_deltas {
            let after = state.balance(*account_id)? + delta;
            if after < 0 {
                return Err(StoreError::Constraint("accounts_balance_check".to_string()));
            }
        }
        for entry in &this.entries {
            if !state.accounts.contains_key(&entry.account_id) {
                return Err(StoreError::Constraint("ledger_entries_account_id_fkey".to_string()));
            }
        }

        for (account_id, delta) in &this.balance_deltas {
            if let Some(row) = state.accounts.get_mut(account_id) {
                row.balance += delta;
            }
        }
        for (key, delta) in this.inventory_deltas {
            *state.inventory.entry(key).or_insert(0) += delta;
        }
        let now = Utc::now();
        for entry in this.entries {
            let id = state.entries.len() as i64 + 1;
            state.entries.push(LedgerEntry {
                id,
                account_id: entry.account_id,
                kind: entry.kind,
                label: entry.label,
                amount: entry.amount,
                transfer_ref: entry.transfer_ref,
                created_at: now,
            });
        }

        drop(state);
        // Row locks released only after the writes are visible
        drop(this.held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryLedgerStore {
        MemoryLedgerStore::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_create_account_duplicate_username() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(a.opening_balance, 1000);

        let err = store.create_account("alice", 1000).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        let b = store.create_account("bob", 1000).await.unwrap();
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let store = store();
        assert!(store.account(42).await.unwrap_err().is_not_found());
        assert!(store.account_by_username("nobody").await.unwrap_err().is_not_found());

        let mut uow = store.begin().await.unwrap();
        assert!(uow.lock_balance(42).await.unwrap_err().is_not_found());
        assert!(uow.account_id_by_username("nobody").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_drop_discards_staged_writes() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();

        {
            let mut uow = store.begin().await.unwrap();
            assert_eq!(uow.lock_balance(a.id).await.unwrap(), 1000);
            uow.adjust_balance(a.id, -80).await.unwrap();
            assert_eq!(uow.lock_balance(a.id).await.unwrap(), 920);
            uow.append_entries(&[NewEntry::purchase(a.id, "t-shirt", 80)])
                .await
                .unwrap();
            uow.add_inventory(a.id, "t-shirt").await.unwrap();
        }

        assert_eq!(store.account(a.id).await.unwrap().balance, 1000);
        assert_eq!(store.entry_count().await, 0);
        assert!(store.inventory(a.id).await.unwrap().is_empty());

        // Lock released by the drop
        let mut uow = store.begin().await.unwrap();
        assert_eq!(uow.lock_balance(a.id).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_commit_applies_everything() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.lock_balance(a.id).await.unwrap();
        uow.adjust_balance(a.id, -20).await.unwrap();
        uow.append_entries(&[NewEntry::purchase(a.id, "cup", 20)])
            .await
            .unwrap();
        assert_eq!(uow.add_inventory(a.id, "cup").await.unwrap(), 1);
        uow.commit().await.unwrap();

        assert_eq!(store.account(a.id).await.unwrap().balance, 980);
        let entries = store.entries(a.id, EntryKind::Purchased).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[0].label, "cup");
        assert_eq!(store.inventory(a.id).await.unwrap()[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_write_without_lock_rejected() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        assert!(matches!(
            uow.adjust_balance(a.id, 10).await,
            Err(StoreError::Invariant(_))
        ));
        assert!(matches!(
            uow.add_inventory(a.id, "pen").await,
            Err(StoreError::Invariant(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_balance_rejected() {
        let store = store();
        let a = store.create_account("alice", 10).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        uow.lock_balance(a.id).await.unwrap();
        assert!(matches!(
            uow.adjust_balance(a.id, -11).await,
            Err(StoreError::Constraint(_))
        ));
        uow.adjust_balance(a.id, -10).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.account(a.id).await.unwrap().balance, 0);
    }

    #[tokio::test]
    async fn test_second_locker_times_out_busy() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_balance(a.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_balance(a.id).await.unwrap_err();
        assert!(err.is_busy(), "got {:?}", err);

        holder.rollback().await.unwrap();
        assert_eq!(waiter.lock_balance(a.id).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_disjoint_accounts_do_not_block() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();
        let b = store.create_account("bob", 1000).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.lock_balance(a.id).await.unwrap();

        let mut second = store.begin().await.unwrap();
        assert_eq!(second.lock_balance(b.id).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_balance() {
        let store = MemoryLedgerStore::new(Duration::from_secs(5));
        let id = store.create_account("alice", 1000).await.unwrap().id;

        let mut holder = store.begin().await.unwrap();
        holder.lock_balance(id).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut uow = waiter_store.begin().await.unwrap();
            uow.lock_balance(id).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.adjust_balance(id, -400).await.unwrap();
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), 600);
    }

    #[tokio::test]
    async fn test_totals_detect_inventory_mismatch() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();

        // inventory without a purchase entry
        let mut uow = store.begin().await.unwrap();
        uow.lock_balance(a.id).await.unwrap();
        uow.add_inventory(a.id, "book").await.unwrap();
        uow.commit().await.unwrap();

        let totals = store.totals().await.unwrap();
        assert_eq!(totals.inventory_mismatches, 1);
        assert_eq!(totals.unpaired_transfers, 0);
    }

    #[tokio::test]
    async fn test_totals_detect_unpaired_transfer() {
        let store = store();
        let a = store.create_account("alice", 1000).await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let [sent, _] = NewEntry::transfer_pair(Uuid::new_v4(), (a.id, "alice"), (a.id, "x"), 5);
        uow.append_entries(&[sent]).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.totals().await.unwrap().unpaired_transfers, 1);
    }
}
