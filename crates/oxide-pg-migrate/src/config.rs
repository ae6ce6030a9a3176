//! Connection and runner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Environment variable holding the connection string.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string.
    pub url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/postgres".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 30,
        }
    }
}

impl DatabaseConfig {
    /// Defaults with the given connection string.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Reads the connection string from `DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        std::env::var(DATABASE_URL_ENV)
            .map(Self::new)
            .map_err(|_| MigrateError::Config(format!("{DATABASE_URL_ENV} is not set")))
    }

    /// Sets the pool size.
    #[must_use]
    pub const fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Acquire timeout as a [`Duration`].
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling, as used in `SET TRANSACTION ISOLATION LEVEL`.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Settings of a [`Migrator`](crate::runner::Migrator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Schema holding the bookkeeping table.
    pub schema: String,
    /// Name of the bookkeeping table.
    pub table: String,
    /// Isolation level of migration transactions.
    pub isolation: IsolationLevel,
    /// Log statements instead of running them.
    pub dry_run: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table: "oxide_migrations".to_string(),
            isolation: IsolationLevel::ReadCommitted,
            dry_run: false,
        }
    }
}

impl MigratorConfig {
    /// Sets the bookkeeping schema.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Sets the bookkeeping table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Sets the isolation level.
    #[must_use]
    pub const fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }
}
