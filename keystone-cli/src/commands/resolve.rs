//! Resolve command implementation.

use anyhow::Result;
use colored::Colorize;
use keystone_core::{LogicalTable, TableResolver};

/// One `logical -> concrete` line per table.
pub fn render(resolver: &TableResolver) -> Vec<String> {
    LogicalTable::ALL
        .iter()
        .map(|table| match resolver.resolve(*table) {
            Some(name) => format!("{:<12} {name}", table.as_str()),
            None => format!("{:<12} <unresolved>", table.as_str()),
        })
        .collect()
}

/// Execute the resolve command.
pub fn execute(quiet: bool) -> Result<()> {
    let resolver = super::resolver()?;

    for line in render(&resolver) {
        println!("{line}");
    }
    if !quiet {
        println!();
        if resolver.is_initialized() {
            println!("{} All tables resolved", "✓".green().bold());
        } else {
            println!("{} Some tables are unresolved", "✗".red().bold());
        }
    }
    Ok(())
}
