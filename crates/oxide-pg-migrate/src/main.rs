//! oxide-pg-migrate CLI
//!
//! Command-line tool for inspecting the migration history of a database.

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use oxide_pg_migrate::prelude::*;

/// Schema migrations for PostgreSQL.
#[derive(Parser)]
#[command(name = "oxide-pg-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// PostgreSQL connection string.
    #[arg(short, long, env = "DATABASE_URL")]
    database: String,

    /// Schema holding the migration history table.
    #[arg(short, long, default_value = "public")]
    schema: String,

    /// Name of the migration history table.
    #[arg(short, long, default_value = "oxide_migrations")]
    table: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the migration history table.
    Init,

    /// Show recorded migrations.
    ShowMigrations,

    /// Report whether a migration has been applied.
    Check {
        /// Migration name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::connect(&DatabaseConfig::new(cli.database)).await?;
    let config = MigratorConfig::default().schema(cli.schema).table(cli.table);
    let migrator = Migrator::new(db, config)?;

    match cli.command {
        Commands::Init => {
            info!("Initializing migration history...");
            migrator.init().await?;
            info!("Migration history table is up to date.");
        }

        Commands::ShowMigrations => {
            migrator.init().await?;

            let records = migrator.history().await?;

            if records.is_empty() {
                info!("No migrations have been applied yet.");
            } else {
                println!("\nApplied migrations:");
                println!("{:-<60}", "");

                for record in &records {
                    let mark = if record.is_completed() { 'X' } else { ' ' };
                    println!(
                        " [{mark}] {} ({})",
                        record.name,
                        record.started_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            }
        }

        Commands::Check { name } => {
            migrator.init().await?;

            if migrator.is_applied(&name).await? {
                println!("{name}: applied");
            } else {
                println!("{name}: not applied");
            }
        }
    }

    Ok(())
}
