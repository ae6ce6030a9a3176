//! PostgreSQL execution and schema migrations for `oxide-pg-core`.
//!
//! `oxide-pg-core` builds queries and migration plans without talking to a
//! database. This crate supplies the sqlx side:
//!
//! - **Database** - a connection pool with scoped clients and transactions,
//!   each usable as a `QueryExecutor`
//! - **Codec** - binding of finalized values and decoding of result rows
//! - **History** - the bookkeeping table of applied migrations
//! - **Migrator** - plans an entity against the live catalog and applies
//!   the plan as one named, transactional migration
//!
//! # Example
//!
//! ```rust,no_run
//! use oxide_pg_core::prelude::*;
//! use oxide_pg_migrate::prelude::*;
//!
//! # async fn run() -> oxide_pg_migrate::error::Result<()> {
//! let user = Entity::builder("public", "app_user")
//!     .column("id", SqlType::Text)
//!     .column("name", SqlType::Text)
//!     .index(IndexSpec::on("idx_app_user_name", ["name"]))
//!     .build()?;
//!
//! let db = Database::connect(&DatabaseConfig::from_env()?).await?;
//! let migrator = Migrator::new(db, MigratorConfig::default())?;
//! migrator.migrate("0001_app_user", &user).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the migration history table
//! oxide-pg-migrate init
//!
//! # List applied migrations
//! oxide-pg-migrate show-migrations
//!
//! # Check a single migration
//! oxide-pg-migrate check 0001_app_user
//! ```

pub mod codec;
pub mod config;
pub mod database;
pub mod error;
pub mod history;
pub mod runner;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{DatabaseConfig, IsolationLevel, MigratorConfig};
    pub use crate::database::{Client, Database, Transaction};
    pub use crate::error::MigrateError;
    pub use crate::history::MigrationRecord;
    pub use crate::runner::Migrator;
}
