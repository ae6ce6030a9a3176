//! Column comparators.
//!
//! A comparator names a column (optionally through an alias and a JSON
//! path) and produces a [`Condition`]. Conditions stay symbolic until a
//! builder renders them against its [`Scope`], which resolves column types
//! and rejects unknown aliases or columns.

use crate::entity::ColumnSpec;
use crate::error::Result;
use crate::json_path::{JsonPath, PathStep};
use crate::prepared::{quote_identifier, PreparedQuery, QueryParam};
use crate::value::{ColumnType, QueryVariable, SqlType, SqlValue, ToSqlValue};

use super::where_clause::Scope;

/// Creates a column comparator.
#[must_use]
pub fn col(name: &str) -> ColumnComparator {
    ColumnComparator {
        alias: None,
        column: String::from(name),
        steps: Vec::new(),
    }
}

/// A column, or a path below a JSON column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnComparator {
    alias: Option<String>,
    column: String,
    steps: Vec<PathStep>,
}

impl ColumnComparator {
    /// Creates an alias-qualified comparator.
    #[must_use]
    pub fn qualified(alias: &str, name: &str) -> Self {
        Self {
            alias: Some(String::from(alias)),
            ..col(name)
        }
    }

    /// Descends one level into a JSON column.
    #[must_use]
    pub fn json_property(&self, name: &str) -> Self {
        let path = JsonPath::new("").property(name);
        let mut next = self.clone();
        next.steps.extend_from_slice(path.steps());
        next
    }

    /// Descends into a JSON array element.
    #[must_use]
    pub fn json_index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.steps.push(PathStep::Index(index));
        next
    }

    /// `@>` containment against a JSON document.
    #[must_use]
    pub fn json_contains(&self, value: serde_json::Value) -> Condition {
        Condition::new(self.operand(), Op::Contains(value))
    }

    /// Casts the column or path, returning comparators typed to `target`.
    #[must_use]
    pub fn cast_as(&self, target: impl Into<ColumnType>) -> CastComparator {
        CastComparator {
            inner: self.clone(),
            target: target.into(),
        }
    }
}

/// A column or path wrapped in an explicit cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastComparator {
    inner: ColumnComparator,
    target: ColumnType,
}

/// The left-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    column: ColumnComparator,
    cast: Option<ColumnType>,
}

/// A left-hand side resolved against a scope.
struct Resolved {
    expr: String,
    value_type: Option<ColumnType>,
}

impl Operand {
    fn resolve(&self, scope: &Scope<'_>, require_json: bool) -> Result<Resolved> {
        let ColumnComparator {
            alias,
            column,
            steps,
        } = &self.column;
        let is_path = !steps.is_empty();
        let spec: Option<&ColumnSpec> =
            scope.lookup(alias.as_deref(), column, is_path || require_json)?;

        let base = if is_path {
            let root = match alias {
                Some(alias) => JsonPath::aliased(alias.as_str(), column.as_str()),
                None => JsonPath::new(column.as_str()),
            };
            root.with_steps(steps).render()
        } else {
            match alias {
                Some(alias) => format!("{}.{}", quote_identifier(alias), quote_identifier(column)),
                None => quote_identifier(column),
            }
        };

        Ok(match self.cast {
            None => Resolved {
                expr: base,
                value_type: if is_path {
                    Some(ColumnType::scalar(SqlType::Jsonb))
                } else {
                    spec.map(|s| s.column_type)
                },
            },
            Some(target) => {
                let through_text = is_path
                    && (target.is_array
                        || !(target.sql_type.is_textual() || target.sql_type.is_json()));
                let expr = if through_text {
                    format!("({base})::text::{}", target.ddl())
                } else {
                    format!("({base})::{}", target.ddl())
                };
                Resolved {
                    expr,
                    value_type: Some(target),
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Equals(SqlValue),
    NotEquals(SqlValue),
    EqualsAny(Vec<SqlValue>),
    EqualsNone(Vec<SqlValue>),
    Like(String),
    NotLike(String),
    IsNull,
    IsNotNull,
    Contains(serde_json::Value),
    EqualsColumn(Operand),
}

/// A single column comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    left: Operand,
    op: Op,
}

impl Condition {
    const fn new(left: Operand, op: Op) -> Self {
        Self { left, op }
    }

    /// Renders the condition, resolving columns through `scope`.
    pub fn render(&self, scope: &Scope<'_>) -> Result<PreparedQuery> {
        let left = self
            .left
            .resolve(scope, matches!(self.op, Op::Contains(_)))?;
        let expr = left.expr.as_str();
        let value_type = left.value_type;

        let query = match &self.op {
            Op::Equals(value) => binary(expr, "=", variable(value, value_type)?),
            Op::NotEquals(value) => binary(expr, "<>", variable(value, value_type)?),
            Op::EqualsAny(values) => {
                let param = array_variable(values, value_type)?;
                PreparedQuery::param(QueryParam::Variable(param)).wrap(&format!("{expr} = ANY("), ")")
            }
            Op::EqualsNone(values) => {
                let param = array_variable(values, value_type)?;
                PreparedQuery::param(QueryParam::Variable(param)).wrap(&format!("{expr} <> ALL("), ")")
            }
            Op::Like(pattern) => binary(
                expr,
                "LIKE",
                QueryVariable::typed(&pattern.as_str().to_sql_value(), SqlType::Text)?,
            ),
            Op::NotLike(pattern) => binary(
                expr,
                "NOT LIKE",
                QueryVariable::typed(&pattern.as_str().to_sql_value(), SqlType::Text)?,
            ),
            Op::IsNull => PreparedQuery::raw(format!("{expr} IS NULL")),
            Op::IsNotNull => PreparedQuery::raw(format!("{expr} IS NOT NULL")),
            Op::Contains(document) => binary(
                expr,
                "@>",
                QueryVariable::typed(&SqlValue::Text(document.to_string()), SqlType::Jsonb)?,
            ),
            Op::EqualsColumn(other) => {
                let right = other.resolve(scope, false)?;
                PreparedQuery::raw(format!("{expr} = {}", right.expr))
            }
        };
        Ok(query)
    }
}

fn binary(expr: &str, operator: &str, var: QueryVariable) -> PreparedQuery {
    PreparedQuery::param(QueryParam::Variable(var)).prefix(&format!("{expr} {operator} "))
}

fn variable(value: &SqlValue, value_type: Option<ColumnType>) -> Result<QueryVariable> {
    match value_type {
        None => QueryVariable::infer(value),
        Some(ColumnType { sql_type, .. }) if sql_type.is_json() => match value {
            SqlValue::Null => QueryVariable::typed(value, sql_type),
            other => QueryVariable::typed(&SqlValue::Text(other.to_json().to_string()), sql_type),
        },
        Some(ColumnType { sql_type, .. }) => QueryVariable::typed(value, sql_type),
    }
}

fn array_variable(values: &[SqlValue], value_type: Option<ColumnType>) -> Result<QueryVariable> {
    match value_type {
        None => QueryVariable::infer(&SqlValue::Array(values.to_vec())),
        Some(ColumnType { sql_type, .. }) => QueryVariable::typed_array(values, sql_type),
    }
}

/// Comparisons available on a column, a JSON path, or a cast.
pub trait Compare {
    /// The left-hand side of conditions built from this comparator.
    fn operand(&self) -> Operand;

    /// `= value`
    #[must_use]
    fn equals(&self, value: impl ToSqlValue) -> Condition {
        Condition::new(self.operand(), Op::Equals(value.to_sql_value()))
    }

    /// `<> value`
    #[must_use]
    fn not_equals(&self, value: impl ToSqlValue) -> Condition {
        Condition::new(self.operand(), Op::NotEquals(value.to_sql_value()))
    }

    /// `= ANY(values)`
    #[must_use]
    fn equals_any<T: ToSqlValue>(&self, values: impl IntoIterator<Item = T>) -> Condition {
        let values = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        Condition::new(self.operand(), Op::EqualsAny(values))
    }

    /// `<> ALL(values)`
    #[must_use]
    fn equals_none<T: ToSqlValue>(&self, values: impl IntoIterator<Item = T>) -> Condition {
        let values = values.into_iter().map(ToSqlValue::to_sql_value).collect();
        Condition::new(self.operand(), Op::EqualsNone(values))
    }

    /// `LIKE pattern`
    #[must_use]
    fn like(&self, pattern: &str) -> Condition {
        Condition::new(self.operand(), Op::Like(String::from(pattern)))
    }

    /// `NOT LIKE pattern`
    #[must_use]
    fn not_like(&self, pattern: &str) -> Condition {
        Condition::new(self.operand(), Op::NotLike(String::from(pattern)))
    }

    /// `IS NULL`
    #[must_use]
    fn is_null(&self) -> Condition {
        Condition::new(self.operand(), Op::IsNull)
    }

    /// `IS NOT NULL`
    #[must_use]
    fn is_not_null(&self) -> Condition {
        Condition::new(self.operand(), Op::IsNotNull)
    }

    /// `= other`, comparing two columns.
    #[must_use]
    fn equals_column(&self, other: &impl Compare) -> Condition {
        Condition::new(self.operand(), Op::EqualsColumn(other.operand()))
    }
}

impl Compare for ColumnComparator {
    fn operand(&self) -> Operand {
        Operand {
            column: self.clone(),
            cast: None,
        }
    }
}

impl Compare for CastComparator {
    fn operand(&self) -> Operand {
        Operand {
            column: self.inner.clone(),
            cast: Some(self.target),
        }
    }
}
