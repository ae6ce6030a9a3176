//! Catalog state as seen by the diff engine.
//!
//! [`CatalogReader`] reads the live catalog through any [`QueryExecutor`];
//! [`CatalogSnapshot`] is an in-memory stand-in used to plan against a known
//! state.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::builder::comparator::{col, Compare};
use crate::builder::select::Query;
use crate::builder::where_clause::WhereBuilder;
use crate::builder::OrderDirection;
use crate::entity::Entity;
use crate::error::{Result, SqlError};
use crate::executor::{QueryExecutor, Row};
use crate::sql;
use crate::value::SqlType;

use super::ddl;

/// A column as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    /// `data_type`, e.g. `character varying` or `ARRAY`.
    pub data_type: String,
    /// `udt_name`, e.g. `varchar` or `_text`.
    pub udt_name: String,
}

/// An index as reported by `pg_indexes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub name: String,
    /// Full `CREATE INDEX` statement.
    pub definition: String,
}

/// Read access to schemas, tables, columns, and indexes.
///
/// Calls are issued one at a time by the diff engine.
pub trait CatalogSource: Send {
    fn schema_exists(&mut self, schema: &str) -> impl Future<Output = Result<bool>> + Send;

    fn table_exists(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Columns of a table, in ordinal order.
    fn columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<Vec<CatalogColumn>>> + Send;

    fn indexes(
        &mut self,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<Vec<CatalogIndex>>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct TableState {
    columns: Vec<CatalogColumn>,
    indexes: Vec<CatalogIndex>,
}

/// An in-memory catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), TableState>,
}

impl CatalogSnapshot {
    /// An empty catalog: no schema, no table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schemas.insert(schema.into());
        self
    }

    /// Adds a table, and its schema when missing.
    #[must_use]
    pub fn with_table(
        mut self,
        schema: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<CatalogColumn>,
        indexes: Vec<CatalogIndex>,
    ) -> Self {
        let schema = schema.into();
        self.schemas.insert(schema.clone());
        self.tables
            .insert((schema, table.into()), TableState { columns, indexes });
        self
    }

    /// The catalog state right after `entity`'s table and indexes are created.
    #[must_use]
    pub fn from_entity(entity: &Entity) -> Self {
        Self::new().merge_entity(entity)
    }

    /// Adds `entity`'s table and indexes, replacing any previous state of it.
    #[must_use]
    pub fn merge_entity(self, entity: &Entity) -> Self {
        let columns = entity
            .fields()
            .iter()
            .map(|field| {
                let column_type = field.spec.column_type;
                let (data_type, udt_name) = if column_type.is_array {
                    (
                        "ARRAY".to_string(),
                        format!("_{}", column_type.sql_type.udt_name()),
                    )
                } else {
                    (
                        column_type.sql_type.catalog_name().to_string(),
                        column_type.sql_type.udt_name().to_string(),
                    )
                };
                CatalogColumn {
                    name: field.name.clone(),
                    is_nullable: field.spec.nullable,
                    column_default: field.spec.default_text(),
                    data_type,
                    udt_name,
                }
            })
            .collect();
        let indexes = entity
            .indexes()
            .iter()
            .map(|index| CatalogIndex {
                name: index.name.clone(),
                definition: ddl::create_index(entity, index).finalize().text,
            })
            .collect();
        self.with_table(entity.schema(), entity.table_name(), columns, indexes)
    }
}

impl CatalogSource for CatalogSnapshot {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        Ok(self.schemas.contains(schema))
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        Ok(self
            .tables
            .contains_key(&(schema.to_string(), table.to_string())))
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<CatalogColumn>> {
        Ok(self
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|state| state.columns.clone())
            .unwrap_or_default())
    }

    async fn indexes(&mut self, schema: &str, table: &str) -> Result<Vec<CatalogIndex>> {
        Ok(self
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|state| state.indexes.clone())
            .unwrap_or_default())
    }
}

/// Reads the live PostgreSQL catalog through the query builders.
pub struct CatalogReader<'e, E> {
    executor: &'e mut E,
    schemata: Arc<Entity>,
    tables: Arc<Entity>,
    columns: Arc<Entity>,
}

impl<'e, E: QueryExecutor> CatalogReader<'e, E> {
    pub fn new(executor: &'e mut E) -> Result<Self> {
        Ok(Self {
            executor,
            schemata: Entity::builder("information_schema", "schemata")
                .column("schema_name", SqlType::Text)
                .build()?,
            tables: Entity::builder("information_schema", "tables")
                .column("table_schema", SqlType::Text)
                .column("table_name", SqlType::Text)
                .build()?,
            columns: Entity::builder("information_schema", "columns")
                .column("table_schema", SqlType::Text)
                .column("table_name", SqlType::Text)
                .column("column_name", SqlType::Text)
                .column("is_nullable", SqlType::Text)
                .column("column_default", SqlType::Text)
                .column("data_type", SqlType::Text)
                .column("udt_name", SqlType::Text)
                .column("ordinal_position", SqlType::Integer)
                .build()?,
        })
    }
}

fn table_filter(
    schema_column: &str,
    table_column: &str,
    schema: &str,
    table: &str,
) -> Result<WhereBuilder> {
    WhereBuilder::new()
        .open_where(col(schema_column).equals(schema))?
        .and_where(col(table_column).equals(table))
}

fn text(row: &Row, key: &str) -> Result<String> {
    match row.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        other => Err(SqlError::InvalidValue {
            key: key.to_string(),
            expected: "text",
            value: other.map_or_else(|| "nothing".to_string(), ToString::to_string),
        }),
    }
}

fn optional_text(row: &Row, key: &str) -> Result<Option<String>> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => text(row, key).map(Some),
    }
}

impl<E: QueryExecutor> CatalogSource for CatalogReader<'_, E> {
    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        let filter = WhereBuilder::new().open_where(col("schema_name").equals(schema))?;
        let row = Query::from(&self.schemata)
            .add_where(&filter)?
            .get_one(&mut *self.executor)
            .await?;
        Ok(row.is_some())
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let filter = table_filter("table_schema", "table_name", schema, table)?;
        let row = Query::from(&self.tables)
            .add_where(&filter)?
            .get_one(&mut *self.executor)
            .await?;
        Ok(row.is_some())
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<CatalogColumn>> {
        let filter = table_filter("table_schema", "table_name", schema, table)?;
        let rows = Query::from(&self.columns)
            .select(&[
                "column_name",
                "is_nullable",
                "column_default",
                "data_type",
                "udt_name",
            ])?
            .add_where(&filter)?
            .add_order_by("ordinal_position", OrderDirection::Asc)?
            .get_many(&mut *self.executor, None)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(CatalogColumn {
                    name: text(row, "column_name")?,
                    is_nullable: text(row, "is_nullable")? == "YES",
                    column_default: optional_text(row, "column_default")?,
                    data_type: text(row, "data_type")?,
                    udt_name: text(row, "udt_name")?,
                })
            })
            .collect()
    }

    /// Indexes backing a constraint (primary keys, unique and exclusion
    /// constraints) belong to the constraint and are left out.
    async fn indexes(&mut self, schema: &str, table: &str) -> Result<Vec<CatalogIndex>> {
        let query = sql!(
            r#"SELECT i."indexname", i."indexdef" FROM "pg_catalog"."pg_indexes" AS i WHERE i."schemaname" = {} AND i."tablename" = {} AND NOT EXISTS (SELECT 1 FROM "pg_catalog"."pg_constraint" AS c WHERE c."conindid" = format('%I.%I', i."schemaname", i."indexname")::regclass) ORDER BY i."indexname" ASC"#,
            schema,
            table
        )?
        .finalize();
        debug!(query = %query, "Reading catalog indexes");
        let rows = self.executor.fetch_all(&query).await?;
        rows.iter()
            .map(|row| {
                Ok(CatalogIndex {
                    name: text(row, "indexname")?,
                    definition: text(row, "indexdef")?,
                })
            })
            .collect()
    }
}
