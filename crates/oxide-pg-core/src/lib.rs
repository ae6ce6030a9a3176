//! # oxide-pg-core
//!
//! Typed PostgreSQL query construction and schema synchronization.
//!
//! This crate provides:
//! - A prepared-query algebra that keeps SQL text and parameters apart until
//!   the query is finalized into `$n::type` placeholders
//! - Entities: declared tables with typed columns and indexes, kept in a
//!   process-wide registry
//! - Where, select, join, and insert builders that validate column and alias
//!   references as they are built
//! - A diff engine turning an entity and the live catalog into an ordered,
//!   reason-tagged list of DDL batches
//!
//! The crate never opens a connection itself. Queries run through the
//! [`QueryExecutor`](executor::QueryExecutor) trait and the catalog is read
//! through [`CatalogSource`](migrations::CatalogSource).
//!
//! ## Building queries
//!
//! ```rust
//! use oxide_pg_core::prelude::*;
//!
//! let user = Entity::builder("public", "test_user")
//!     .column("id", SqlType::Uuid)
//!     .column("name", SqlType::Text)
//!     .column("meta", SqlType::Jsonb)
//!     .build()
//!     .unwrap();
//!
//! let filter = WhereBuilder::new()
//!     .open_where(col("meta").json_property("isCool").cast_as(SqlType::Boolean).equals(true))
//!     .unwrap();
//! let query = Query::from(&user)
//!     .select(&["id", "name"])
//!     .unwrap()
//!     .add_where(&filter)
//!     .unwrap()
//!     .get_query(None)
//!     .unwrap()
//!     .finalize();
//!
//! assert_eq!(
//!     query.text,
//!     r#"SELECT "id", "name" FROM "public"."test_user" WHERE ("meta"->'isCool')::text::boolean = $1::boolean"#
//! );
//! ```

pub mod builder;
pub mod entity;
pub mod error;
pub mod executor;
pub mod json_path;
pub mod migrations;
pub mod prepared;
pub mod value;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builder::comparator::{col, Compare, Condition};
    pub use crate::builder::insert::InsertBuilder;
    pub use crate::builder::join::{JoinKind, JoinQuery};
    pub use crate::builder::row::RawDecoder;
    pub use crate::builder::select::Query;
    pub use crate::builder::where_clause::WhereBuilder;
    pub use crate::builder::{LockStrength, LockWait, OrderDirection, Page, RowLock};
    pub use crate::entity::{registry, ColumnSpec, Entity, EntityRegistry, IndexColumn, IndexSpec};
    pub use crate::error::{Result, SqlError};
    pub use crate::executor::{QueryExecutor, Row};
    pub use crate::json_path::JsonPath;
    pub use crate::migrations::{
        suggest_migrations, CatalogReader, CatalogSnapshot, CatalogSource, MigrationReason,
        SuggestedMigration,
    };
    pub use crate::prepared::{
        as_bool, as_casted_value, as_date, as_jsonb, as_text, as_timestamp, as_unescaped,
        FinalizedQuery, PreparedQuery,
    };
    pub use crate::sql;
    pub use crate::value::{ColumnType, SqlType, SqlValue};
}

pub use entity::{Entity, EntityRegistry};
pub use error::{Result, SqlError};
pub use prepared::{FinalizedQuery, PreparedQuery};
