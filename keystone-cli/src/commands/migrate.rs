//! Migrate command implementation.

use anyhow::Result;
use colored::Colorize;

/// Execute the migrate command.
pub async fn execute(database_url: Option<String>, quiet: bool) -> Result<()> {
    super::connect(database_url, 1).await?;

    if !quiet {
        println!("{} Database schema is up to date", "✓".green().bold());
    }
    Ok(())
}
