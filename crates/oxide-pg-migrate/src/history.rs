//! Migration history bookkeeping.
//!
//! Applied migrations are recorded in one table, declared as an ordinary
//! [`Entity`] so that it is created and kept up to date by the same diff
//! engine as user tables.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use oxide_pg_core::entity::{ColumnSpec, Entity, IndexSpec};
use oxide_pg_core::prepared::PreparedQuery;
use oxide_pg_core::value::SqlType;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Declares the bookkeeping table `schema.table`.
///
/// `name` is unique, which is what turns a second run of the same
/// migration into [`MigrateError::DuplicateMigration`](crate::error::MigrateError::DuplicateMigration).
pub fn history_entity(schema: &str, table: &str) -> Result<Arc<Entity>> {
    let entity = Entity::builder(schema, table)
        .column("name", SqlType::Text)
        .field(
            "started_at",
            ColumnSpec::new(SqlType::TimestampTz).default_sql(PreparedQuery::raw("now()")),
        )
        .field(
            "completed_at",
            ColumnSpec::new(SqlType::TimestampTz).nullable(),
        )
        .index(IndexSpec::on(format!("{table}_name_key"), ["name"]).unique())
        .build()?;
    Ok(entity)
}

/// A row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration name.
    pub name: String,
    /// When the migration transaction inserted this record.
    pub started_at: DateTime<Utc>,
    /// Set as the last statement of the migration transaction.
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
    /// Whether the migration ran to completion.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}
