//! coin_ledger - ledger maintenance entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │  Config  │───▶│  Store   │───▶│ Audit / Info │───▶│  stdout  │
//! │  (YAML)  │    │(PG / mem)│    │              │    │  (JSON)  │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘
//! ```
//!
//! Usage: `coin_ledger [--env dev] [--audit | --summary <username>]`

use anyhow::{Context, bail};
use std::sync::Arc;
use std::time::Duration;

use coin_ledger::catalog::Catalog;
use coin_ledger::config::AppConfig;
use coin_ledger::db::Database;
use coin_ledger::ledger::{AccountQuery, LedgerAuditor};
use coin_ledger::store::{LedgerStore, MemoryLedgerStore, PgLedgerStore, StoreError, schema};

enum Command {
    Audit,
    Summary(String),
}

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn get_command() -> anyhow::Result<Command> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--summary" {
            let Some(username) = args.get(i + 1) else {
                bail!("--summary requires a username");
            };
            return Ok(Command::Summary(username.clone()));
        }
    }
    Ok(Command::Audit)
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    let lock_timeout = Duration::from_millis(config.store.lock_timeout_ms);

    let Some(url) = config.postgres_url.as_deref() else {
        tracing::warn!("postgres_url not set, using in-memory store");
        return Ok(Arc::new(MemoryLedgerStore::new(lock_timeout)));
    };

    let db = Database::connect(url, &config.store)
        .await
        .context("connecting to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check")?;
    if config.store.init_schema {
        schema::init_schema(db.pool())
            .await
            .context("initialising ledger schema")?;
        tracing::info!("Ledger schema initialised");
    }
    Ok(Arc::new(PgLedgerStore::new(&db, lock_timeout)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let command = get_command()?;

    let app_config = AppConfig::load(&env)?;
    let _log_guard = coin_ledger::logging::init_logging(&app_config);

    tracing::info!(git = env!("GIT_HASH"), "Starting coin_ledger in {} mode", env);

    let catalog = Catalog::from_config(app_config.catalog.as_ref())?;
    tracing::info!(items = catalog.len(), "Catalog loaded");

    let store = open_store(&app_config).await?;
    tracing::info!(store = store.name(), "Ledger store ready");

    match command {
        Command::Audit => {
            let report = LedgerAuditor::new(store).run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                bail!("ledger audit found {} violation(s)", report.violations.len());
            }
        }
        Command::Summary(username) => {
            let account = match store.account_by_username(&username).await {
                Ok(account) => account,
                Err(StoreError::NotFound) => bail!("no account named {username:?}"),
                Err(e) => return Err(e.into()),
            };
            let summary = AccountQuery::new(store).summary(account.id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
