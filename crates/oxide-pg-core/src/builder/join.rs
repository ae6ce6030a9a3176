//! SELECT builder over aliased, joined entities.
//!
//! Selected columns are labelled `alias_column` so that a flat result row
//! can be folded back into `{ alias: { column: value } }`. Folding follows
//! the declared selection, not the keys present in the row: an outer-joined
//! alias whose columns are all NULL becomes `null`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::{validate_identifier, Entity, MAX_IDENTIFIER_LEN};
use crate::error::{Result, SqlError};
use crate::executor::{QueryExecutor, Row};
use crate::prepared::{quote_identifier, PreparedQuery};

use super::row::RawDecoder;
use super::where_clause::{Scope, WhereBuilder};
use super::{Clauses, OrderDirection, Page, RowLock};

/// Join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// `INNER JOIN`
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
}

impl JoinKind {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    kind: JoinKind,
    on: PreparedQuery,
}

#[derive(Debug, Clone)]
struct RawSelection {
    fragment: PreparedQuery,
    key: String,
    decoder: RawDecoder,
}

/// A SELECT across several aliased entities.
#[derive(Debug, Clone)]
pub struct JoinQuery {
    aliases: Vec<(String, Arc<Entity>)>,
    /// `joins[i]` attaches `aliases[i + 1]`.
    joins: Vec<Join>,
    /// Aliases that may come back without a matching row.
    nullable: Vec<bool>,
    selections: Vec<(String, Vec<String>)>,
    raws: Vec<RawSelection>,
    clauses: Clauses,
}

impl JoinQuery {
    /// Starts a join rooted at `entity` under `alias`.
    #[allow(clippy::should_implement_trait)]
    pub fn from(entity: &Arc<Entity>, alias: &str) -> Result<Self> {
        validate_identifier("alias", alias)?;
        let query = Self {
            aliases: vec![(String::from(alias), Arc::clone(entity))],
            joins: Vec::new(),
            nullable: vec![false],
            selections: Vec::new(),
            raws: Vec::new(),
            clauses: Clauses::default(),
        };
        query.ensure_distinct_labels()?;
        Ok(query)
    }

    /// `INNER JOIN entity AS alias ON condition`
    pub fn inner_join(&self, entity: &Arc<Entity>, alias: &str, on: &WhereBuilder) -> Result<Self> {
        self.join(JoinKind::Inner, entity, alias, on)
    }

    /// `LEFT JOIN entity AS alias ON condition`
    pub fn left_join(&self, entity: &Arc<Entity>, alias: &str, on: &WhereBuilder) -> Result<Self> {
        self.join(JoinKind::Left, entity, alias, on)
    }

    /// `RIGHT JOIN entity AS alias ON condition`
    pub fn right_join(&self, entity: &Arc<Entity>, alias: &str, on: &WhereBuilder) -> Result<Self> {
        self.join(JoinKind::Right, entity, alias, on)
    }

    fn join(
        &self,
        kind: JoinKind,
        entity: &Arc<Entity>,
        alias: &str,
        on: &WhereBuilder,
    ) -> Result<Self> {
        validate_identifier("alias", alias)?;
        self.ensure_unused(alias)?;

        let mut next = self.clone();
        next.aliases.push((String::from(alias), Arc::clone(entity)));
        let on = on
            .render(&Scope::Aliases(&next.aliases))?
            .unwrap_or_else(|| PreparedQuery::raw("TRUE"));
        next.joins.push(Join { kind, on });

        match kind {
            JoinKind::Inner => next.nullable.push(false),
            JoinKind::Left => next.nullable.push(true),
            JoinKind::Right => {
                next.nullable.iter_mut().for_each(|n| *n = true);
                next.nullable.push(false);
            }
        }
        next.ensure_distinct_labels()?;
        Ok(next)
    }

    fn ensure_unused(&self, name: &str) -> Result<()> {
        let taken = self.aliases.iter().any(|(a, _)| a == name)
            || self.raws.iter().any(|r| r.key == name);
        if taken {
            Err(SqlError::DuplicateAlias(String::from(name)))
        } else {
            Ok(())
        }
    }

    /// Result labels of the statement: `alias_column` per selected column,
    /// then raw keys.
    fn labels(&self) -> Vec<String> {
        self.manifest()
            .into_iter()
            .flat_map(|(alias, columns, _)| {
                columns
                    .into_iter()
                    .map(move |column| format!("{alias}_{column}"))
            })
            .chain(self.raws.iter().map(|raw| raw.key.clone()))
            .collect()
    }

    fn ensure_distinct_labels(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for label in self.labels() {
            if label.len() > MAX_IDENTIFIER_LEN {
                return Err(SqlError::IdentifierTooLong {
                    kind: "result label",
                    name: label,
                });
            }
            if !seen.insert(label.clone()) {
                return Err(SqlError::DuplicateLabel(label));
            }
        }
        Ok(())
    }

    fn entity(&self, alias: &str) -> Result<&Arc<Entity>> {
        self.aliases
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, e)| e)
            .ok_or_else(|| SqlError::UnknownAlias {
                alias: String::from(alias),
                known: self.aliases.iter().map(|(a, _)| a.clone()).collect(),
            })
    }

    /// Selects columns of `alias`.
    pub fn select(&self, alias: &str, columns: &[&str]) -> Result<Self> {
        let entity = self.entity(alias)?;
        if columns.is_empty() {
            return Err(SqlError::EmptySelection(format!(
                "{} AS {alias}",
                entity.display_name()
            )));
        }
        for column in columns {
            entity.require_column(column)?;
        }
        let mut next = self.clone();
        let position = next.selections.iter().position(|(a, _)| a == alias);
        let selected = match position {
            Some(position) => &mut next.selections[position].1,
            None => {
                next.selections.push((String::from(alias), Vec::new()));
                let last = next.selections.len() - 1;
                &mut next.selections[last].1
            }
        };
        for column in columns {
            if !selected.iter().any(|c| c == column) {
                selected.push(String::from(*column));
            }
        }
        next.ensure_distinct_labels()?;
        Ok(next)
    }

    /// Selects an arbitrary expression under `key`, checked by `decoder`.
    pub fn select_raw(&self, fragment: PreparedQuery, key: &str, decoder: RawDecoder) -> Result<Self> {
        validate_identifier("result key", key)?;
        self.ensure_unused(key)?;
        let mut next = self.clone();
        next.raws.push(RawSelection {
            fragment,
            key: String::from(key),
            decoder,
        });
        next.ensure_distinct_labels()?;
        Ok(next)
    }

    /// Adds a condition; several calls are joined with AND.
    pub fn add_where(&self, condition: &WhereBuilder) -> Result<Self> {
        let mut next = self.clone();
        if let Some(rendered) = condition.render(&Scope::Aliases(&self.aliases))? {
            next.clauses.wheres.push(rendered);
        }
        Ok(next)
    }

    fn column_expr(&self, alias: &str, column: &str) -> Result<String> {
        self.entity(alias)?.require_column(column)?;
        Ok(format!("{}.{}", quote_identifier(alias), quote_identifier(column)))
    }

    /// Adds a GROUP BY column.
    pub fn add_group_by(&self, alias: &str, column: &str) -> Result<Self> {
        let expr = self.column_expr(alias, column)?;
        let mut next = self.clone();
        next.clauses.group_by.push(PreparedQuery::raw(expr));
        Ok(next)
    }

    /// Adds an ORDER BY column.
    pub fn add_order_by(&self, alias: &str, column: &str, direction: OrderDirection) -> Result<Self> {
        let expr = self.column_expr(alias, column)?;
        let mut next = self.clone();
        next.clauses.order_by.push(Clauses::order_entry(expr, direction));
        Ok(next)
    }

    /// Adds a raw ORDER BY entry.
    #[must_use]
    pub fn add_raw_order_by(&self, fragment: PreparedQuery) -> Self {
        let mut next = self.clone();
        next.clauses.order_by.push(fragment);
        next
    }

    /// Appends a row-locking clause; its `OF` target must be a known alias.
    pub fn with_lock(&self, lock: RowLock) -> Result<Self> {
        if let Some(alias) = lock.target() {
            self.entity(alias)?;
        }
        let mut next = self.clone();
        next.clauses.lock = Some(lock);
        Ok(next)
    }

    /// Selected `(alias, columns, nullable)` triples, in selection order.
    fn manifest(&self) -> Vec<(&str, Vec<&str>, bool)> {
        let nullable = |alias: &str| {
            self.aliases
                .iter()
                .position(|(a, _)| a == alias)
                .is_some_and(|i| self.nullable[i])
        };
        if self.selections.is_empty() && self.raws.is_empty() {
            return self
                .aliases
                .iter()
                .map(|(alias, entity)| (alias.as_str(), entity.column_names().collect(), nullable(alias)))
                .collect();
        }
        self.selections
            .iter()
            .map(|(alias, columns)| {
                (
                    alias.as_str(),
                    columns.iter().map(String::as_str).collect(),
                    nullable(alias),
                )
            })
            .collect()
    }

    /// Builds the statement.
    pub fn get_query(&self, page: Option<Page>) -> Result<PreparedQuery> {
        let mut selected = Vec::new();
        for (alias, columns, _) in self.manifest() {
            for column in columns {
                selected.push(PreparedQuery::raw(format!(
                    "{}.{} AS {}",
                    quote_identifier(alias),
                    quote_identifier(column),
                    quote_identifier(&format!("{alias}_{column}"))
                )));
            }
        }
        for raw in &self.raws {
            selected.push(
                raw.fragment
                    .wrap("(", &format!(") AS {}", quote_identifier(&raw.key))),
            );
        }
        let list = PreparedQuery::join(selected, Some(&PreparedQuery::raw(", ")))?;

        let mut head = list.prefix("SELECT ");
        let mut aliases = self.aliases.iter();
        if let Some((alias, entity)) = aliases.next() {
            head.append(PreparedQuery::raw(format!(
                " FROM {} AS {}",
                entity.qualified_name(),
                quote_identifier(alias)
            )));
        }
        for ((alias, entity), join) in aliases.zip(&self.joins) {
            head.append(PreparedQuery::raw(format!(
                " {} {} AS {} ON ",
                join.kind.keyword(),
                entity.qualified_name(),
                quote_identifier(alias)
            )));
            head.append(join.on.clone());
        }
        self.clauses.render(head, page)
    }

    /// Folds a flat row into `{ alias: { column: value }, key: value }`.
    pub fn build_one(&self, row: Option<&Row>) -> Result<Option<Value>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let mut out = Map::new();
        for (alias, columns, nullable) in self.manifest() {
            let mut fields = Map::new();
            for column in columns {
                let value = row
                    .get(&format!("{alias}_{column}"))
                    .cloned()
                    .unwrap_or(Value::Null);
                fields.insert(String::from(column), value);
            }
            let absent = nullable && fields.values().all(Value::is_null);
            let folded = if absent {
                Value::Null
            } else {
                Value::Object(fields)
            };
            out.insert(String::from(alias), folded);
        }
        for raw in &self.raws {
            let value = row.get(&raw.key).unwrap_or(&Value::Null);
            out.insert(raw.key.clone(), raw.decoder.decode(&raw.key, value)?);
        }
        Ok(Some(Value::Object(out)))
    }

    /// Folds every row.
    pub fn build_many(&self, rows: &[Row]) -> Result<Vec<Value>> {
        rows.iter()
            .map(|row| self.build_one(Some(row)).map(|v| v.unwrap_or(Value::Null)))
            .collect()
    }

    /// Fetches and folds the first matching row.
    pub async fn get_one<E: QueryExecutor>(&self, executor: &mut E) -> Result<Option<Value>> {
        let query = self.get_query(Some(Page::limit(1)))?.finalize();
        debug!(query = %query, "Fetching one joined row");
        let rows = executor.fetch_all(&query).await?;
        self.build_one(rows.first())
    }

    /// Fetches and folds every matching row in `page`.
    pub async fn get_many<E: QueryExecutor>(
        &self,
        executor: &mut E,
        page: Option<Page>,
    ) -> Result<Vec<Value>> {
        let query = self.get_query(page)?.finalize();
        debug!(query = %query, "Fetching joined rows");
        let rows = executor.fetch_all(&query).await?;
        self.build_many(&rows)
    }

    /// Fetches the first matching row and deserializes the folded value.
    pub async fn get_one_as<T, E>(&self, executor: &mut E) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        E: QueryExecutor,
    {
        self.get_one(executor)
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Fetches every matching row and deserializes the folded values.
    pub async fn get_many_as<T, E>(&self, executor: &mut E, page: Option<Page>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        E: QueryExecutor,
    {
        self.get_many(executor, page)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(Into::into))
            .collect()
    }
}
