//! Schema synchronization.
//!
//! The diff engine compares one [`Entity`](crate::entity::Entity) with the
//! catalog state reported by a [`CatalogSource`] and produces an ordered
//! list of [`SuggestedMigration`]s. It never executes anything: running the
//! plan inside a transaction is the caller's job.
//!
//! ```rust
//! use oxide_pg_core::entity::Entity;
//! use oxide_pg_core::migrations::{suggest_migrations, CatalogSnapshot, MigrationReason};
//! use oxide_pg_core::value::SqlType;
//!
//! # tokio_test_block_on(async {
//! let user = Entity::builder("public", "test_user")
//!     .column("id", SqlType::Uuid)
//!     .build()
//!     .unwrap();
//! let mut catalog = CatalogSnapshot::new().with_schema("public");
//! let plan = suggest_migrations(&user, &mut catalog).await.unwrap();
//! assert_eq!(plan[0].reason, MigrationReason::MissingTable);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub mod catalog;
pub mod ddl;
pub mod diff;

use std::fmt;

use serde::Serialize;

use crate::prepared::FinalizedQuery;

pub use catalog::{CatalogColumn, CatalogIndex, CatalogReader, CatalogSnapshot, CatalogSource};
pub use diff::suggest_migrations;

/// Why a migration is suggested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MigrationReason {
    /// The schema does not exist.
    MissingSchema,
    /// The table does not exist.
    MissingTable,
    /// An index of a newly created table.
    MissingIndex,
    /// An existing index is not declared.
    UnusedIndex,
    /// A declared index does not exist.
    NewIndex,
    /// An index definition or name changed.
    IndexUpdated,
    /// An existing column is not declared.
    UnusedColumn,
    /// A declared column does not exist.
    NewColumn,
    /// A column was renamed.
    ColumnRenamed,
    /// A column default changed.
    ColumnDefaultUpdated,
    /// A column type or nullability changed.
    ColumnTypeUpdated,
}

impl MigrationReason {
    /// Human-readable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingSchema => "Missing Schema",
            Self::MissingTable => "Missing Table",
            Self::MissingIndex => "Missing Index",
            Self::UnusedIndex => "Unused Index",
            Self::NewIndex => "New Index",
            Self::IndexUpdated => "Index Updated",
            Self::UnusedColumn => "Unused Column",
            Self::NewColumn => "New Column",
            Self::ColumnRenamed => "Column Renamed",
            Self::ColumnDefaultUpdated => "Column Default Updated",
            Self::ColumnTypeUpdated => "Column Type Updated",
        }
    }
}

impl fmt::Display for MigrationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reason-tagged batch of DDL statements.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestedMigration {
    /// Why the batch is needed.
    pub reason: MigrationReason,
    /// Statements to run, in order.
    pub queries: Vec<FinalizedQuery>,
}

impl SuggestedMigration {
    /// Creates a batch.
    #[must_use]
    pub const fn new(reason: MigrationReason, queries: Vec<FinalizedQuery>) -> Self {
        Self { reason, queries }
    }
}

impl fmt::Display for SuggestedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- {}", self.reason)?;
        for query in &self.queries {
            writeln!(f, "{query};")?;
        }
        Ok(())
    }
}
