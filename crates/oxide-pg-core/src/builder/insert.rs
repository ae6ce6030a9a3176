//! Multi-row INSERT builder.
//!
//! Values are cast to the declared column type rather than the type inferred
//! from the value, so a column keeps its type whatever the caller passes.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::entity::Entity;
use crate::error::{Result, SqlError};
use crate::executor::{QueryExecutor, Row};
use crate::prepared::{quote_identifier, PreparedQuery, QueryParam};
use crate::value::{QueryVariable, SqlValue};

/// An INSERT into one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBuilder {
    entity: Arc<Entity>,
    columns: Vec<String>,
    rows: Vec<Vec<QueryVariable>>,
    returning: Vec<String>,
}

impl InsertBuilder {
    /// Binds every declared column of `entity`, in declaration order.
    #[must_use]
    pub fn new(entity: &Arc<Entity>) -> Self {
        Self {
            entity: Arc::clone(entity),
            columns: entity.column_names().map(String::from).collect(),
            rows: Vec::new(),
            returning: Vec::new(),
        }
    }

    /// Binds an explicit list of columns.
    pub fn with_columns(entity: &Arc<Entity>, columns: &[&str]) -> Result<Self> {
        for column in columns {
            entity.require_column(column)?;
        }
        Ok(Self {
            columns: columns.iter().map(|c| String::from(*c)).collect(),
            ..Self::new(entity)
        })
    }

    /// Bound columns.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Adds rows. Every row must be an object carrying every bound column.
    pub fn add_rows<T: Serialize>(&self, rows: &[T]) -> Result<Self> {
        let mut next = self.clone();
        for row in rows {
            let position = next.rows.len();
            let serde_json::Value::Object(mut object) = serde_json::to_value(row)? else {
                return Err(SqlError::InvalidInsertRow(position));
            };
            let mut values = Vec::with_capacity(self.columns.len());
            for column in &self.columns {
                let value = object
                    .remove(column)
                    .ok_or_else(|| SqlError::MissingInsertColumn {
                        row: position,
                        column: column.clone(),
                    })?;
                let spec = self.entity.require_column(column)?;
                let column_type = spec.column_type;
                let value = SqlValue::from_json(
                    value,
                    column_type.sql_type.is_json() && !column_type.is_array,
                );
                values.push(QueryVariable::typed(&value, column_type.sql_type.value_cast())?);
            }
            next.rows.push(values);
        }
        Ok(next)
    }

    /// Narrows the RETURNING clause.
    pub fn returning(&self, columns: &[&str]) -> Result<Self> {
        for column in columns {
            self.entity.require_column(column)?;
        }
        let mut next = self.clone();
        next.returning = columns.iter().map(|c| String::from(*c)).collect();
        Ok(next)
    }

    /// Builds the statement.
    pub fn get_query(&self) -> Result<PreparedQuery> {
        self.entity.require_fields()?;
        if self.columns.is_empty() {
            return Err(SqlError::EmptyEntity(self.entity.display_name()));
        }
        if self.rows.is_empty() {
            return Err(SqlError::EmptyInsert);
        }

        let columns: Vec<String> = self.columns.iter().map(|c| quote_identifier(c)).collect();
        let comma = PreparedQuery::raw(",");
        let tuples = self
            .rows
            .iter()
            .map(|row| {
                let values = row
                    .iter()
                    .map(|var| PreparedQuery::param(QueryParam::Variable(var.clone())));
                PreparedQuery::join(values, Some(&comma)).map(|q| q.brackets())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut query = PreparedQuery::join(tuples, Some(&comma))?.prefix(&format!(
            "INSERT INTO {} ({}) VALUES ",
            self.entity.qualified_name(),
            columns.join(",")
        ));
        if !self.returning.is_empty() {
            let returning: Vec<String> =
                self.returning.iter().map(|c| quote_identifier(c)).collect();
            query = query.suffix(&format!(" RETURNING {}", returning.join(",")));
        }
        Ok(query)
    }

    /// Runs the INSERT, returning the RETURNING rows (empty without RETURNING).
    pub async fn execute<E: QueryExecutor>(&self, executor: &mut E) -> Result<Vec<Row>> {
        let query = self.get_query()?.finalize();
        debug!(
            entity = %self.entity.display_name(),
            rows = self.rows.len(),
            "Inserting rows"
        );
        if self.returning.is_empty() {
            executor.execute(&query).await?;
            Ok(Vec::new())
        } else {
            executor.fetch_all(&query).await
        }
    }

    /// Runs the INSERT and deserializes the RETURNING rows.
    pub async fn execute_as<T, E>(&self, executor: &mut E) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        E: QueryExecutor,
    {
        self.execute(executor)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ColumnSpec;
    use crate::value::{SqlType, WireValue};
    use serde_json::json;

    fn user() -> Arc<Entity> {
        Entity::builder("public", "test_user")
            .column("id", SqlType::Uuid)
            .column("name", SqlType::Text)
            .column("meta", SqlType::Jsonb)
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_casts_from_declared_types() {
        let query = InsertBuilder::new(&user())
            .add_rows(&[json!({
                "id": "6f0dea07-3a5f-4e9d-9a3b-6d2a3c1f0b11",
                "name": "test",
                "meta": {"isCool": true}
            })])
            .unwrap()
            .get_query()
            .unwrap()
            .finalize();
        assert_eq!(
            query.text,
            r#"INSERT INTO "public"."test_user" ("id","name","meta") VALUES ($1::text,$2::text,$3::jsonb)"#
        );
        assert_eq!(
            query.values,
            vec![
                WireValue::Text("6f0dea07-3a5f-4e9d-9a3b-6d2a3c1f0b11".into()),
                WireValue::Text("test".into()),
                WireValue::Text(r#"{"isCool":true}"#.into()),
            ]
        );
    }

    #[test]
    fn test_missing_column_fails_at_add_time() {
        let err = InsertBuilder::new(&user())
            .add_rows(&[json!({"id": "x", "name": "n"})])
            .unwrap_err();
        assert!(matches!(
            err,
            SqlError::MissingInsertColumn { row: 0, ref column } if column == "meta"
        ));
    }

    #[test]
    fn test_zero_rows_is_rejected() {
        let err = InsertBuilder::new(&user()).get_query().unwrap_err();
        assert!(matches!(err, SqlError::EmptyInsert));
    }

    #[test]
    fn test_entity_without_fields_is_rejected() {
        let empty = Entity::builder("public", "empty").build().unwrap();
        let err = InsertBuilder::new(&empty).get_query().unwrap_err();
        assert!(matches!(err, SqlError::EmptyEntity(_)));
    }

    #[test]
    fn test_numeric_column_fed_a_string() {
        let entity = Entity::builder("public", "counter")
            .column("total", SqlType::Integer)
            .field("tags", ColumnSpec::new(crate::value::ColumnType::array_of(SqlType::Text)))
            .build()
            .unwrap();
        let query = InsertBuilder::new(&entity)
            .add_rows(&[json!({"total": "12", "tags": ["a", "b"]}), json!({"total": 3, "tags": []})])
            .unwrap()
            .returning(&["total"])
            .unwrap()
            .get_query()
            .unwrap()
            .finalize();
        assert_eq!(
            query.text,
            concat!(
                r#"INSERT INTO "public"."counter" ("total","tags") VALUES "#,
                r#"($1::integer,$2::text[]),($3::integer,$4::text[]) RETURNING "total""#
            )
        );
        assert_eq!(query.values[0], WireValue::Text("12".into()));
        assert_eq!(query.values[3], WireValue::Array(vec![]));
    }

    #[test]
    fn test_non_object_row_is_rejected() {
        let err = InsertBuilder::new(&user()).add_rows(&[json!(1)]).unwrap_err();
        assert!(matches!(err, SqlError::InvalidInsertRow(0)));
    }
}
