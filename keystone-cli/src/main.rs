//! Keystone CLI - Table management for the passkey relying party.

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;

use exit_codes::ExitCode;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(author, version, about = "Keystone passkey backend operator tool", long_about = None)]
#[command(after_help = "Exit codes:
  0   Success
  1   General error
  64  Usage error (missing database URL, invalid table override)
  65  Schema drift detected
  69  Database unavailable")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the concrete table name of every logical table
    Resolve,

    /// Run the PostgreSQL migrations
    Migrate {
        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,
    },

    /// Create the ceremony, credential and user tables if missing
    EnsureTables {
        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,
    },

    /// Compare deployed tables with the entity indexes
    VerifySchema {
        /// PostgreSQL connection string
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "keystone=debug,keystone_core=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let quiet = cli.quiet;

    let result = match cli.command {
        Commands::Resolve => commands::resolve::execute(quiet),
        Commands::Migrate { database_url } => commands::migrate::execute(database_url, quiet).await,
        Commands::EnsureTables { database_url } => {
            commands::tables::ensure(database_url, quiet).await
        }
        Commands::VerifySchema { database_url } => {
            commands::tables::verify(database_url, quiet).await
        }
    };

    let exit = match result {
        Ok(()) => ExitCode::success(),
        Err(err) => ExitCode::from_anyhow(&err),
    };
    if let Some(message) = &exit.message {
        eprintln!("{} {message}", "error:".red().bold());
    }
    std::process::ExitCode::from(u8::try_from(exit.code).unwrap_or(1))
}
