//! CLI entry point for CrossStore.
//!
//! This binary provides the `crosstore` command with the migration surface
//! (`migrate up|down|status|reset|create`) plus a connectivity check. The
//! connection target comes from a TOML configuration file; `.env` is loaded
//! first so credentials can stay out of the config.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crosstore::{MigrationState, Store, StoreConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod migrations;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// CrossStore: one API over SQLite, PostgreSQL, MySQL, MongoDB, Redis.
#[derive(Parser)]
#[command(
    name = "crosstore",
    version,
    about = "CrossStore: polyglot database tooling",
    long_about = "Migration and connectivity tooling for the CrossStore \
                  database abstraction layer. The active backend is chosen \
                  by the `driver` key of the configuration file."
)]
struct Cli {
    /// Path to the TOML connection configuration.
    #[arg(long, global = true, default_value = "crosstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run schema migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),

    /// Connect to the configured backend and report success.
    Ping,
}

#[derive(Subcommand)]
enum MigrateCommand {
    /// Apply all pending migrations as one batch.
    Up,

    /// Roll back the most recent batch.
    Down,

    /// Show every known migration as applied or pending.
    Status,

    /// Roll every migration back and clear the tracking store.
    Reset {
        /// Seconds to wait before the destructive action, allowing a
        /// Ctrl-C.
        #[arg(long, default_value_t = 5)]
        delay_secs: u64,
    },

    /// Generate a timestamped migration skeleton source file.
    Create {
        /// Human-readable migration name; it is slugified into the file
        /// name.
        name: String,

        /// Directory the skeleton is written to.
        #[arg(long, default_value = "migrations")]
        dir: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    // Credentials may live in .env rather than the config file.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    match cli.command {
        Commands::Migrate(command) => cmd_migrate(&cli.config, command).await,
        Commands::Ping => cmd_ping(&cli.config).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &PathBuf) -> Result<StoreConfig> {
    StoreConfig::from_toml_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

async fn open_store(path: &PathBuf) -> Result<Store> {
    let config = load_config(path)?;
    Store::open(config)
        .await
        .context("failed to connect to the configured backend")
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_ping(config_path: &PathBuf) -> Result<()> {
    let store = open_store(config_path).await?;
    println!("ok: connected ({})", store.manager().config().driver);
    store.close().await?;
    Ok(())
}

async fn cmd_migrate(config_path: &PathBuf, command: MigrateCommand) -> Result<()> {
    // `create` only writes a file; it must work without a reachable
    // backend.
    if let MigrateCommand::Create { name, dir } = &command {
        let store = Store::with_config(load_config(config_path)?);
        let migrator = store.migrator(migrations::registry());
        let path = migrator.create(dir, name)?;
        println!("created {}", path.display());
        return Ok(());
    }

    let store = open_store(config_path).await?;
    let migrator = store.migrator(migrations::registry());

    let result = match command {
        MigrateCommand::Up => {
            let applied = migrator.up().await?;
            if applied.is_empty() {
                println!("nothing to migrate");
            }
            for name in applied {
                println!("migrated  {name}");
            }
            Ok(())
        }
        MigrateCommand::Down => {
            let rolled_back = migrator.down().await?;
            if rolled_back.is_empty() {
                println!("nothing to roll back");
            }
            for name in rolled_back {
                println!("rolled back  {name}");
            }
            Ok(())
        }
        MigrateCommand::Status => {
            for line in migrator.status().await? {
                match line.state {
                    MigrationState::Applied { batch } => {
                        println!("Applied {batch}  {}", line.name);
                    }
                    MigrationState::Pending => println!("Pending    {}", line.name),
                    MigrationState::Orphaned { batch } => {
                        println!("Orphaned {batch} {} (tracked but not registered)", line.name);
                    }
                }
            }
            Ok(())
        }
        MigrateCommand::Reset { delay_secs } => {
            warn!(
                delay_secs,
                "resetting will roll back EVERY migration and clear the tracking store"
            );
            println!(
                "resetting in {delay_secs}s (press Ctrl-C to cancel)"
            );
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            migrator.reset().await?;
            info!("reset complete");
            Ok(())
        }
        MigrateCommand::Create { .. } => unreachable!("handled above"),
    };

    store.close().await?;
    result
}
