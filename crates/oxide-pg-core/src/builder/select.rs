//! SELECT builder for a single entity.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::entity::Entity;
use crate::error::{Result, SqlError};
use crate::executor::{QueryExecutor, Row};
use crate::prepared::{quote_identifier, PreparedQuery};

use super::where_clause::{Scope, WhereBuilder};
use super::{Clauses, OrderDirection, Page, RowLock};

/// A SELECT against one entity.
///
/// Result rows are keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entity: Arc<Entity>,
    columns: Option<Vec<String>>,
    clauses: Clauses,
}

impl Query {
    /// Starts a query selecting every declared column of `entity`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from(entity: &Arc<Entity>) -> Self {
        Self {
            entity: Arc::clone(entity),
            columns: None,
            clauses: Clauses::default(),
        }
    }

    /// The queried entity.
    #[must_use]
    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    /// Narrows the selected columns.
    pub fn select(&self, columns: &[&str]) -> Result<Self> {
        if columns.is_empty() {
            return Err(SqlError::EmptySelection(self.entity.display_name()));
        }
        for column in columns {
            self.entity.require_column(column)?;
        }
        let mut next = self.clone();
        next.columns = Some(columns.iter().map(|c| String::from(*c)).collect());
        Ok(next)
    }

    /// Adds a condition; several calls are joined with AND.
    pub fn add_where(&self, condition: &WhereBuilder) -> Result<Self> {
        let mut next = self.clone();
        if let Some(rendered) = condition.render(&Scope::Entity(&self.entity))? {
            next.clauses.wheres.push(rendered);
        }
        Ok(next)
    }

    /// Adds a GROUP BY column.
    pub fn add_group_by(&self, column: &str) -> Result<Self> {
        self.entity.require_column(column)?;
        let mut next = self.clone();
        next.clauses
            .group_by
            .push(PreparedQuery::raw(quote_identifier(column)));
        Ok(next)
    }

    /// Adds an ORDER BY column.
    pub fn add_order_by(&self, column: &str, direction: OrderDirection) -> Result<Self> {
        self.entity.require_column(column)?;
        let mut next = self.clone();
        next.clauses
            .order_by
            .push(Clauses::order_entry(quote_identifier(column), direction));
        Ok(next)
    }

    /// Adds a raw ORDER BY entry.
    #[must_use]
    pub fn add_raw_order_by(&self, fragment: PreparedQuery) -> Self {
        let mut next = self.clone();
        next.clauses.order_by.push(fragment);
        next
    }

    /// Appends a row-locking clause.
    #[must_use]
    pub fn with_lock(&self, lock: RowLock) -> Self {
        let mut next = self.clone();
        next.clauses.lock = Some(lock);
        next
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.as_ref().map_or_else(
            || self.entity.column_names().collect(),
            |columns| columns.iter().map(String::as_str).collect(),
        )
    }

    /// Builds the statement.
    pub fn get_query(&self, page: Option<Page>) -> Result<PreparedQuery> {
        self.entity.require_fields()?;
        let columns: Vec<String> = self
            .column_names()
            .into_iter()
            .map(quote_identifier)
            .collect();
        let head = PreparedQuery::raw(format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            self.entity.qualified_name()
        ));
        self.clauses.render(head, page)
    }

    /// Fetches the first matching row.
    pub async fn get_one<E: QueryExecutor>(&self, executor: &mut E) -> Result<Option<Row>> {
        let query = self.get_query(Some(Page::limit(1)))?.finalize();
        debug!(query = %query, "Fetching one row");
        let rows = executor.fetch_all(&query).await?;
        Ok(rows.into_iter().next())
    }

    /// Fetches every matching row in `page`.
    pub async fn get_many<E: QueryExecutor>(
        &self,
        executor: &mut E,
        page: Option<Page>,
    ) -> Result<Vec<Row>> {
        let query = self.get_query(page)?.finalize();
        debug!(query = %query, "Fetching rows");
        executor.fetch_all(&query).await
    }

    /// Fetches the first matching row and deserializes it.
    pub async fn get_one_as<T, E>(&self, executor: &mut E) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        E: QueryExecutor,
    {
        self.get_one(executor)
            .await?
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)))
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches every matching row and deserializes them.
    pub async fn get_many_as<T, E>(&self, executor: &mut E, page: Option<Page>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        E: QueryExecutor,
    {
        self.get_many(executor, page)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::comparator::{col, Compare};
    use crate::builder::LockStrength;
    use crate::error::SqlError;
    use crate::value::SqlType;

    fn user() -> Arc<Entity> {
        Entity::builder("public", "test_user")
            .column("id", SqlType::Uuid)
            .column("name", SqlType::Text)
            .column("meta", SqlType::Jsonb)
            .build()
            .unwrap()
    }

    #[test]
    fn test_select_all_declared_columns() {
        let query = Query::from(&user()).get_query(None).unwrap().finalize();
        assert_eq!(
            query.text,
            r#"SELECT "id", "name", "meta" FROM "public"."test_user""#
        );
        assert!(query.values.is_empty());
    }

    #[test]
    fn test_full_statement_order() {
        let w = WhereBuilder::new()
            .open_where(col("name").equals("bob"))
            .unwrap();
        let query = Query::from(&user())
            .select(&["id", "name"])
            .unwrap()
            .add_where(&w)
            .unwrap()
            .add_group_by("id")
            .unwrap()
            .add_group_by("name")
            .unwrap()
            .add_order_by("name", OrderDirection::Desc)
            .unwrap()
            .add_raw_order_by(PreparedQuery::raw("random()"))
            .with_lock(RowLock::new(LockStrength::Update).nowait())
            .get_query(Some(Page::new(5, 10)))
            .unwrap()
            .finalize();
        assert_eq!(
            query.text,
            concat!(
                r#"SELECT "id", "name" FROM "public"."test_user" WHERE "name" = $1::text"#,
                r#" GROUP BY ("id", "name") ORDER BY "name" DESC, random()"#,
                " OFFSET $2::double precision LIMIT $3::double precision FOR UPDATE NOWAIT"
            )
        );
        assert_eq!(query.values.len(), 3);
    }

    #[test]
    fn test_multiple_wheres_are_anded() {
        let a = WhereBuilder::new().open_where(col("name").is_null()).unwrap();
        let b = WhereBuilder::new().open_where(col("id").is_not_null()).unwrap();
        let query = Query::from(&user())
            .add_where(&a)
            .unwrap()
            .add_where(&b)
            .unwrap()
            .get_query(None)
            .unwrap()
            .finalize();
        assert!(query
            .text
            .ends_with(r#"WHERE ("name" IS NULL) AND ("id" IS NOT NULL)"#));
    }

    #[test]
    fn test_empty_column_list_is_rejected() {
        let err = Query::from(&user()).select(&[]).unwrap_err();
        assert_eq!(err.to_string(), "select on public.test_user names no columns");
    }

    #[test]
    fn test_unknown_columns_are_rejected() {
        let query = Query::from(&user());
        assert!(matches!(
            query.select(&["nope"]),
            Err(SqlError::UnknownColumn { .. })
        ));
        assert!(query.add_order_by("nope", OrderDirection::Asc).is_err());
        assert!(query.add_group_by("nope").is_err());
    }

    #[test]
    fn test_builder_is_persistent() {
        let base = Query::from(&user());
        let narrowed = base.select(&["id"]).unwrap();
        assert_ne!(base, narrowed);
        assert!(base
            .get_query(None)
            .unwrap()
            .finalize()
            .text
            .contains(r#""meta""#));
    }
}
