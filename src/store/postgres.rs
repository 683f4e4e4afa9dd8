//! PostgreSQL Ledger Store
//!
//! Each unit of work is one `sqlx::Transaction`. Locking reads are
//! `SELECT ... FOR UPDATE` with a transaction-local `lock_timeout`, so a
//! blocked request fails with SQLSTATE 55P03 (mapped to `Busy`) instead of
//! waiting indefinitely.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LedgerStore, StoreError, UnitOfWork};
use crate::core_types::{AccountId, Coins};
use crate::db::Database;
use crate::models::{Account, EntryKind, InventoryLine, LedgerEntry, LedgerTotals, NewEntry};

/// PostgreSQL-backed ledger store
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(db: &Database, lock_timeout: Duration) -> Self {
        Self {
            pool: db.pool().clone(),
            lock_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_account(row: &PgRow) -> Result<Account, StoreError> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        balance: row.try_get("balance")?,
        opening_balance: row.try_get("opening_balance")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_entry(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        kind: EntryKind::from_str(&kind).map_err(StoreError::Invariant)?,
        label: row.try_get("label")?,
        amount: row.try_get("amount")?,
        transfer_ref: row.try_get("transfer_ref")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // SET cannot take bind parameters; set_config(.., true) is the LOCAL form
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn create_account(
        &self,
        username: &str,
        opening_balance: Coins,
    ) -> Result<Account, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO accounts (username, balance, opening_balance)
            VALUES ($1, $2, $2)
            RETURNING id, username, balance, opening_balance, created_at
            "#,
        )
        .bind(username)
        .bind(opening_balance)
        .fetch_one(&self.pool)
        .await?;

        row_to_account(&row)
    }

    async fn account(&self, account_id: AccountId) -> Result<Account, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, balance, opening_balance, created_at FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        row_to_account(&row)
    }

    async fn account_by_username(&self, username: &str) -> Result<Account, StoreError> {
        let row = sqlx::query(
            r#"SELECT id, username, balance, opening_balance, created_at
               FROM accounts WHERE username = $1"#,
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        row_to_account(&row)
    }

    async fn inventory(&self, account_id: AccountId) -> Result<Vec<InventoryLine>, StoreError> {
        let rows = sqlx::query(
            "SELECT account_id, item, quantity FROM inventory WHERE account_id = $1 ORDER BY item",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                Ok(InventoryLine {
                    account_id: r.try_get("account_id")?,
                    item: r.try_get("item")?,
                    quantity: r.try_get("quantity")?,
                })
            })
            .collect()
    }

    async fn entries(
        &self,
        account_id: AccountId,
        kind: EntryKind,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, kind, label, amount, transfer_ref, created_at
            FROM ledger_entries
            WHERE account_id = $1 AND kind = $2
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn totals(&self) -> Result<LedgerTotals, StoreError> {
        // One snapshot for all three reads, so concurrent commits cannot skew the sums
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let accounts = sqlx::query(
            r#"
            SELECT COUNT(*)                                   AS account_count,
                   COALESCE(SUM(balance), 0)::BIGINT          AS balance_sum,
                   COALESCE(SUM(opening_balance), 0)::BIGINT  AS opening_sum,
                   COUNT(*) FILTER (WHERE balance < 0)        AS negative_balances
            FROM accounts
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        let entries = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(SUM(amount), 0)::BIGINT
                   FROM ledger_entries WHERE kind = 'purchased') AS purchased_sum,
                (SELECT COUNT(*) FROM (
                    SELECT transfer_ref
                    FROM ledger_entries
                    WHERE transfer_ref IS NOT NULL
                    GROUP BY transfer_ref
                    HAVING COUNT(*) FILTER (WHERE kind = 'sent') <> 1
                        OR COUNT(*) FILTER (WHERE kind = 'received') <> 1
                        OR COUNT(*) <> 2
                        OR MIN(amount) <> MAX(amount)
                 ) unpaired) AS unpaired_transfers
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        let inventory = sqlx::query(
            r#"
            SELECT COUNT(*) AS inventory_mismatches
            FROM inventory i
            FULL OUTER JOIN (
                SELECT account_id, label AS item, COUNT(*) AS purchases
                FROM ledger_entries
                WHERE kind = 'purchased'
                GROUP BY account_id, label
            ) p ON i.account_id = p.account_id AND i.item = p.item
            WHERE COALESCE(i.quantity, 0) <> COALESCE(p.purchases, 0)
            "#,
        )
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(LedgerTotals {
            account_count: accounts.try_get("account_count")?,
            balance_sum: accounts.try_get("balance_sum")?,
            opening_sum: accounts.try_get("opening_sum")?,
            negative_balances: accounts.try_get("negative_balances")?,
            purchased_sum: entries.try_get("purchased_sum")?,
            unpaired_transfers: entries.try_get("unpaired_transfers")?,
            inventory_mismatches: inventory.try_get("inventory_mismatches")?,
        })
    }
}

/// Unit of work over one PostgreSQL transaction
///
/// Dropping the sqlx transaction without commit issues ROLLBACK.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn account_id_by_username(&mut self, username: &str) -> Result<AccountId, StoreError> {
        let id: AccountId = sqlx::query_scalar("SELECT id FROM accounts WHERE username = $1")
            .bind(username)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(id)
    }

    async fn username_of(&mut self, account_id: AccountId) -> Result<String, StoreError> {
        let username: String = sqlx::query_scalar("SELECT username FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(username)
    }

    async fn lock_balance(&mut self, account_id: AccountId) -> Result<Coins, StoreError> {
        let balance: Coins =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_one(&mut *self.tx)
                .await
                .map_err(|e| {
                    let e = StoreError::from(e);
                    if e.is_busy() {
                        warn!(account_id, error = %e, "Locking balance read timed out");
                    }
                    e
                })?;
        debug!(account_id, balance, "Balance locked");
        Ok(balance)
    }

    async fn adjust_balance(&mut self, account_id: AccountId, delta: Coins) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE accounts SET balance = balance + $1 WHERE id = $2")
            .bind(delta)
            .bind(account_id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_entries(&mut self, entries: &[NewEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO ledger_entries (account_id, kind, label, amount, transfer_ref) ",
        );
        qb.push_values(entries, |mut b, e| {
            b.push_bind(e.account_id)
                .push_bind(e.kind.as_str())
                .push_bind(e.label.clone())
                .push_bind(e.amount)
                .push_bind(e.transfer_ref);
        });

        let result = qb.build().execute(&mut *self.tx).await?;
        if result.rows_affected() != entries.len() as u64 {
            return Err(StoreError::Invariant(format!(
                "appended {} of {} entries",
                result.rows_affected(),
                entries.len()
            )));
        }
        Ok(())
    }

    async fn add_inventory(&mut self, account_id: AccountId, item: &str) -> Result<i64, StoreError> {
        let quantity: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inventory (account_id, item, quantity)
            VALUES ($1, $2, 1)
            ON CONFLICT (account_id, item)
            DO UPDATE SET quantity = inventory.quantity + 1, updated_at = NOW()
            RETURNING quantity
            "#,
        )
        .bind(account_id)
        .bind(item)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(quantity)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
