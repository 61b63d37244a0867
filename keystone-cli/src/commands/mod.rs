//! CLI command implementations.

pub mod migrate;
pub mod resolve;
pub mod tables;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use keystone_core::{Context, PostgresStore, TableResolver};
use tracing::info;

use crate::exit_codes::UsageError;

/// Upper bound for any single store call issued by a command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect to PostgreSQL and bring its migrations up to date.
pub async fn connect(database_url: Option<String>, max_connections: u32) -> Result<PostgresStore> {
    let url = database_url.ok_or_else(|| {
        UsageError("a database URL is required (--database-url or DATABASE_URL)".into())
    })?;
    let store = PostgresStore::new(&url, max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Migrations up to date");
    Ok(store)
}

/// Table names from `KEYSTONE_TABLE_*`, or the naming convention.
pub fn resolver() -> Result<Arc<TableResolver>> {
    let resolver = TableResolver::from_env().context("Invalid table override")?;
    Ok(Arc::new(resolver))
}

pub fn context() -> Context {
    Context::with_timeout(COMMAND_TIMEOUT)
}
