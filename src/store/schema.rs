//! PostgreSQL schema for the ledger tables

use sqlx::PgPool;

pub const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id              BIGSERIAL PRIMARY KEY,
    username        TEXT        NOT NULL UNIQUE,
    balance         BIGINT      NOT NULL CHECK (balance >= 0),
    opening_balance BIGINT      NOT NULL CHECK (opening_balance >= 0),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// One line per (account, item); the purchase upsert conflicts on this key.
pub const CREATE_INVENTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS inventory (
    account_id BIGINT      NOT NULL REFERENCES accounts (id),
    item       TEXT        NOT NULL,
    quantity   BIGINT      NOT NULL CHECK (quantity >= 0),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT inventory_account_item_key UNIQUE (account_id, item)
)
"#;

pub const CREATE_LEDGER_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_entries (
    id           BIGSERIAL PRIMARY KEY,
    account_id   BIGINT      NOT NULL REFERENCES accounts (id),
    kind         TEXT        NOT NULL CHECK (kind IN ('sent', 'received', 'purchased')),
    label        TEXT        NOT NULL,
    amount       BIGINT      NOT NULL CHECK (amount > 0),
    transfer_ref UUID,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK ((kind = 'purchased') = (transfer_ref IS NULL))
)
"#;

pub const CREATE_LEDGER_ENTRIES_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS ledger_entries_account_kind_idx
    ON ledger_entries (account_id, kind)
"#;

pub const CREATE_TRANSFER_REF_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS ledger_entries_transfer_ref_idx
    ON ledger_entries (transfer_ref)
    WHERE transfer_ref IS NOT NULL
"#;

/// Append-only: reject UPDATE and DELETE on the entry log.
pub const CREATE_APPEND_ONLY_GUARD: &str = r#"
CREATE OR REPLACE FUNCTION ledger_entries_append_only() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'ledger_entries is append-only';
END;
$$ LANGUAGE plpgsql
"#;

pub const DROP_APPEND_ONLY_TRIGGER: &str =
    "DROP TRIGGER IF EXISTS ledger_entries_append_only_trg ON ledger_entries";

pub const CREATE_APPEND_ONLY_TRIGGER: &str = r#"
CREATE TRIGGER ledger_entries_append_only_trg
    BEFORE UPDATE OR DELETE ON ledger_entries
    FOR EACH ROW EXECUTE FUNCTION ledger_entries_append_only()
"#;

const STATEMENTS: [(&str, &str); 8] = [
    ("accounts table", CREATE_ACCOUNTS_TABLE),
    ("inventory table", CREATE_INVENTORY_TABLE),
    ("ledger_entries table", CREATE_LEDGER_ENTRIES_TABLE),
    ("ledger_entries account index", CREATE_LEDGER_ENTRIES_INDEX),
    ("ledger_entries transfer index", CREATE_TRANSFER_REF_INDEX),
    ("append-only function", CREATE_APPEND_ONLY_GUARD),
    ("append-only trigger drop", DROP_APPEND_ONLY_TRIGGER),
    ("append-only trigger", CREATE_APPEND_ONLY_TRIGGER),
];

/// Initialize the ledger schema. Safe to run repeatedly.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing ledger schema...");

    // Serialize concurrent initializers (parallel test binaries)
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock(7402)")
        .execute(&mut *tx)
        .await?;

    for (what, ddl) in STATEMENTS {
        if let Err(e) = sqlx::query(ddl).execute(&mut *tx).await {
            tracing::error!(error = %e, "Failed to create {}", what);
            return Err(e);
        }
    }

    tx.commit().await?;
    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inventory_unique_per_account_item() {
        assert!(CREATE_INVENTORY_TABLE.contains("UNIQUE (account_id, item)"));
        assert!(!CREATE_INVENTORY_TABLE.contains("UNIQUE (account_id, quantity)"));
    }

    #[test]
    fn test_balance_never_negative() {
        assert!(CREATE_ACCOUNTS_TABLE.contains("CHECK (balance >= 0)"));
    }

    #[test]
    fn test_all_statements_idempotent() {
        for (what, ddl) in STATEMENTS {
            let ddl = ddl.trim_start();
            assert!(
                ddl.contains("IF NOT EXISTS")
                    || ddl.contains("IF EXISTS")
                    || ddl.starts_with("CREATE OR REPLACE")
                    // recreated right after its DROP ... IF EXISTS
                    || ddl.starts_with("CREATE TRIGGER"),
                "{} is not idempotent",
                what
            );
        }
    }
}
