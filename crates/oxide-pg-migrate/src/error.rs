//! Error types for database execution and migration runs.

use oxide_pg_core::error::SqlError;

/// Errors that can occur while talking to PostgreSQL or running migrations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Query construction, execution, decoding, or diffing failed.
    #[error(transparent)]
    Sql(#[from] SqlError),

    /// Connection or pool error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The named migration already has a bookkeeping record.
    #[error("Migration '{name}' has already been run")]
    DuplicateMigration {
        /// Migration name.
        name: String,
    },

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrateError {
    /// Returns `true` for [`MigrateError::DuplicateMigration`].
    #[must_use]
    pub const fn is_duplicate_migration(&self) -> bool {
        matches!(self, Self::DuplicateMigration { .. })
    }
}

/// Result type for execution and migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
