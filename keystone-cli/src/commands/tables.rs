//! Table management commands: ensure-tables and verify-schema.

use anyhow::{Context as _, Result};
use colored::Colorize;
use keystone_core::{ensure_tables, verify_schema, Store};
use tracing::{error, info};

use crate::exit_codes::DriftDetected;

/// Execute the ensure-tables command.
pub async fn ensure(database_url: Option<String>, quiet: bool) -> Result<()> {
    let resolver = super::resolver()?;
    let store = super::connect(database_url, 2).await?;

    ensure_tables(&super::context(), &store as &dyn Store, &resolver)
        .await
        .context("Failed to ensure tables")?;
    info!("Tables ensured");

    if !quiet {
        for line in super::resolve::render(&resolver) {
            println!("{} {line}", "✓".green());
        }
    }
    Ok(())
}

/// Execute the verify-schema command.
pub async fn verify(database_url: Option<String>, quiet: bool) -> Result<()> {
    let resolver = super::resolver()?;
    let store = super::connect(database_url, 2).await?;

    let reasons = verify_schema(&super::context(), &store as &dyn Store, &resolver)
        .await
        .context("Failed to read table descriptions")?;

    if reasons.is_empty() {
        info!("No schema drift");
        if !quiet {
            println!("{} Deployed tables match entity indexes", "✓".green().bold());
        }
        return Ok(());
    }

    for reason in &reasons {
        error!(reason = %reason, "Schema drift");
        if !quiet {
            println!("{} {reason}", "✗".red().bold());
        }
    }
    Err(DriftDetected(reasons.len()).into())
}
