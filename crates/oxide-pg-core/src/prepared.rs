//! Prepared-query algebra.
//!
//! A [`PreparedQuery`] is a list of literal text segments interleaved with
//! parameters. There is always exactly one more text segment than there are
//! parameters. Queries compose by splicing: the last segment of the left side
//! is joined with the first segment of the right side, so parameter order is
//! kept and the segment invariant holds.
//!
//! [`PreparedQuery::finalize`] turns a prepared query into a
//! [`FinalizedQuery`] with `$n::type` placeholders. A finalized query is
//! terminal: it cannot be used as a template argument.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::entity::Entity;
use crate::error::{Result, SqlError};
use crate::json_path::JsonPath;
use crate::value::{QueryVariable, SqlType, SqlValue, ToSqlValue, WireValue};

/// A parameter slot inside a [`PreparedQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    /// A typed value, sent as a positional parameter.
    Variable(QueryVariable),
    /// A literal inlined into the SQL text at finalize time.
    Unescaped(String),
}

/// SQL text with embedded, not yet numbered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    texts: Vec<String>,
    params: Vec<QueryParam>,
}

impl Default for PreparedQuery {
    fn default() -> Self {
        Self::empty()
    }
}

impl PreparedQuery {
    /// An empty query.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            texts: vec![String::new()],
            params: Vec::new(),
        }
    }

    /// A query made of literal text only.
    #[must_use]
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            texts: vec![text.into()],
            params: Vec::new(),
        }
    }

    /// A query holding a single parameter.
    #[must_use]
    pub fn param(param: QueryParam) -> Self {
        Self {
            texts: vec![String::new(), String::new()],
            params: vec![param],
        }
    }

    /// Builds a query from literal segments and one argument per gap.
    ///
    /// `segments` must hold exactly one more element than `args`.
    pub fn template<S: AsRef<str>>(segments: &[S], args: Vec<TemplateArg>) -> Result<Self> {
        if segments.len() != args.len() + 1 {
            return Err(SqlError::TemplateArity {
                slots: segments.len().saturating_sub(1),
                args: args.len(),
            });
        }
        let mut segments = segments.iter();
        let mut query = Self::raw(segments.next().map_or("", AsRef::as_ref));
        for (arg, segment) in args.into_iter().zip(segments) {
            query.append(arg.into_query()?);
            query.push_text(segment.as_ref());
        }
        Ok(query)
    }

    /// Builds a query from a format string where each `{}` is an argument slot.
    ///
    /// Used by the [`sql!`](crate::sql) macro.
    pub fn format(template: &str, args: Vec<TemplateArg>) -> Result<Self> {
        let segments: Vec<&str> = template.split("{}").collect();
        Self::template(&segments, args)
    }

    /// Text segments.
    #[must_use]
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    /// Parameters, in order.
    #[must_use]
    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// Number of positional (escaped) parameters.
    #[must_use]
    pub fn variable_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| matches!(p, QueryParam::Variable(_)))
            .count()
    }

    /// Returns `true` when the query has no text and no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.texts.iter().all(String::is_empty)
    }

    /// Splices `other` onto the end of this query.
    pub fn append(&mut self, other: Self) {
        let mut texts = other.texts.into_iter();
        if let Some(first) = texts.next() {
            self.push_text(&first);
        }
        self.params.extend(other.params);
        self.texts.extend(texts);
    }

    /// Returns the concatenation of `self` and `other`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        let mut joined = self.clone();
        joined.append(other.clone());
        joined
    }

    fn push_text(&mut self, text: &str) {
        if let Some(last) = self.texts.last_mut() {
            last.push_str(text);
        } else {
            self.texts.push(text.to_string());
        }
    }

    /// Concatenates `queries`, inserting `delimiter` between each pair.
    pub fn join<I>(queries: I, delimiter: Option<&Self>) -> Result<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        let mut queries = queries.into_iter();
        let mut joined = queries.next().ok_or(SqlError::EmptyJoin)?;
        for query in queries {
            if let Some(delimiter) = delimiter {
                joined.append(delimiter.clone());
            }
            joined.append(query);
        }
        Ok(joined)
    }

    /// Prepends literal text.
    #[must_use]
    pub fn prefix(&self, text: &str) -> Self {
        let mut query = self.clone();
        if let Some(first) = query.texts.first_mut() {
            first.insert_str(0, text);
        }
        query
    }

    /// Appends literal text.
    #[must_use]
    pub fn suffix(&self, text: &str) -> Self {
        let mut query = self.clone();
        query.push_text(text);
        query
    }

    /// Surrounds the query with literal text.
    #[must_use]
    pub fn wrap(&self, prefix: &str, suffix: &str) -> Self {
        self.prefix(prefix).suffix(suffix)
    }

    /// Surrounds the query with parentheses.
    #[must_use]
    pub fn brackets(&self) -> Self {
        self.wrap("(", ")")
    }

    /// Numbers the parameters and inlines unescaped literals.
    #[must_use]
    pub fn finalize(&self) -> FinalizedQuery {
        let mut text = String::new();
        let mut values = Vec::with_capacity(self.params.len());
        let mut texts = self.texts.iter();
        if let Some(first) = texts.next() {
            text.push_str(first);
        }
        for (param, segment) in self.params.iter().zip(texts) {
            match param {
                QueryParam::Unescaped(literal) => text.push_str(literal),
                QueryParam::Variable(var) => {
                    values.push(var.value.clone());
                    text.push('$');
                    text.push_str(&values.len().to_string());
                    text.push_str(&var.cast_suffix());
                }
            }
            text.push_str(segment);
        }
        FinalizedQuery { text, values }
    }
}

/// A query with `$n` placeholders and the aligned list of values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedQuery {
    /// SQL text.
    pub text: String,
    /// Parameter values, `values[0]` binds `$1`.
    pub values: Vec<WireValue>,
}

impl fmt::Display for FinalizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)?;
        if !self.values.is_empty() {
            let values = serde_json::to_string(&self.values).map_err(|_| fmt::Error)?;
            write!(f, " -- values: {values}")?;
        }
        Ok(())
    }
}

/// An argument filling one slot of a template.
#[derive(Debug, Clone)]
pub enum TemplateArg {
    /// A value whose SQL type is inferred.
    Value(SqlValue),
    /// A value sent with an explicit SQL type.
    Cast(SqlValue, SqlType),
    /// An already typed variable.
    Var(QueryVariable),
    /// An entity, expanded to its quoted, schema-qualified table name.
    Entity(Arc<Entity>),
    /// A JSON path, expanded to its path expression.
    Path(JsonPath),
    /// A nested query, spliced in place.
    Query(PreparedQuery),
    /// A literal inlined as is.
    Unescaped(String),
}

impl TemplateArg {
    fn into_query(self) -> Result<PreparedQuery> {
        let param = match self {
            Self::Value(value) => QueryParam::Variable(QueryVariable::infer(&value)?),
            Self::Cast(value, sql_type) => {
                QueryParam::Variable(QueryVariable::typed(&value, sql_type)?)
            }
            Self::Var(var) => QueryParam::Variable(var),
            Self::Entity(entity) => QueryParam::Unescaped(entity.qualified_name()),
            Self::Path(path) => QueryParam::Unescaped(path.render()),
            Self::Unescaped(literal) => QueryParam::Unescaped(literal),
            Self::Query(query) => return Ok(query),
        };
        Ok(PreparedQuery::param(param))
    }
}

/// Conversion into a template argument.
///
/// Implemented for plain values, entities, JSON paths, and prepared queries.
/// [`FinalizedQuery`] deliberately has no implementation.
pub trait IntoTemplateArg {
    /// Performs the conversion.
    fn into_template_arg(self) -> TemplateArg;
}

impl IntoTemplateArg for TemplateArg {
    fn into_template_arg(self) -> TemplateArg {
        self
    }
}

impl IntoTemplateArg for PreparedQuery {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Query(self)
    }
}

impl IntoTemplateArg for &PreparedQuery {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Query(self.clone())
    }
}

impl IntoTemplateArg for JsonPath {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Path(self)
    }
}

impl IntoTemplateArg for &JsonPath {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Path(self.clone())
    }
}

impl IntoTemplateArg for Arc<Entity> {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Entity(self)
    }
}

impl IntoTemplateArg for &Arc<Entity> {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Entity(Arc::clone(self))
    }
}

impl IntoTemplateArg for QueryVariable {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Var(self)
    }
}

macro_rules! value_template_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoTemplateArg for $ty {
                fn into_template_arg(self) -> TemplateArg {
                    TemplateArg::Value(self.to_sql_value())
                }
            }
        )*
    };
}

value_template_arg!(
    SqlValue,
    bool,
    i32,
    i64,
    u32,
    f64,
    String,
    &str,
    chrono::NaiveDate,
    chrono::DateTime<chrono::Utc>,
    serde_json::Value,
);

impl<T: ToSqlValue> IntoTemplateArg for Option<T> {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Value(self.to_sql_value())
    }
}

impl<T: ToSqlValue> IntoTemplateArg for Vec<T> {
    fn into_template_arg(self) -> TemplateArg {
        TemplateArg::Value(self.to_sql_value())
    }
}

/// Inlines `literal` into the SQL text without escaping.
#[must_use]
pub fn as_unescaped(literal: impl Into<String>) -> TemplateArg {
    TemplateArg::Unescaped(literal.into())
}

/// Sends `value` as `text`.
#[must_use]
pub fn as_text(value: impl ToSqlValue) -> TemplateArg {
    as_casted_value(value, SqlType::Text)
}

/// Sends `value` as `boolean`.
#[must_use]
pub fn as_bool(value: impl ToSqlValue) -> TemplateArg {
    as_casted_value(value, SqlType::Boolean)
}

/// Sends `value` as `date`.
#[must_use]
pub fn as_date(value: impl ToSqlValue) -> TemplateArg {
    as_casted_value(value, SqlType::Date)
}

/// Sends `value` as `timestamp`.
#[must_use]
pub fn as_timestamp(value: impl ToSqlValue) -> TemplateArg {
    as_casted_value(value, SqlType::Timestamp)
}

/// Sends `value` as `jsonb`.
#[must_use]
pub fn as_jsonb(value: impl ToSqlValue) -> TemplateArg {
    as_casted_value(value, SqlType::Jsonb)
}

/// Sends `value` cast to `sql_type`.
#[must_use]
pub fn as_casted_value(value: impl ToSqlValue, sql_type: SqlType) -> TemplateArg {
    TemplateArg::Cast(value.to_sql_value(), sql_type)
}

/// Quotes an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal, doubling embedded single quotes.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds a [`PreparedQuery`] from a format string and arguments.
///
/// Every `{}` in the literal is a slot filled by the matching argument:
/// plain values become typed parameters, entities and JSON paths expand to
/// SQL text, and prepared queries are spliced in.
///
/// ```rust
/// use oxide_pg_core::sql;
///
/// let query = sql!("SELECT 1 WHERE {} = {}", "a", 2).unwrap();
/// assert_eq!(query.finalize().text, "SELECT 1 WHERE $1::text = $2::double precision");
/// ```
#[macro_export]
macro_rules! sql {
    ($template:literal $(, $arg:expr)* $(,)?) => {
        $crate::prepared::PreparedQuery::format(
            $template,
            vec![$($crate::prepared::IntoTemplateArg::into_template_arg($arg)),*],
        )
    };
}
