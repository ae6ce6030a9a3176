//! WHERE clause builder.
//!
//! A [`WhereBuilder`] is a persistent value: every call returns a new
//! builder and leaves the receiver untouched. It moves through three states:
//!
//! - empty: nothing opened yet;
//! - chained: conditions joined by one operator, fixed by the first
//!   `and_where`/`or_where` call;
//! - composed: the result of [`WhereBuilder::all`] or [`WhereBuilder::either`],
//!   each part wrapped in parentheses.

use std::sync::Arc;

use crate::entity::{ColumnSpec, Entity};
use crate::error::{Result, SqlError};
use crate::prepared::PreparedQuery;

use super::comparator::Condition;

/// Resolves column references while rendering conditions.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// No entity information; types are inferred from values.
    Unscoped,
    /// A single entity, referenced by bare column names.
    Entity(&'a Entity),
    /// Aliased entities of a join, referenced as `alias.column`.
    Aliases(&'a [(String, Arc<Entity>)]),
}

impl<'a> Scope<'a> {
    /// Resolves `alias.column`, returning its declaration when known.
    pub fn lookup(
        &self,
        alias: Option<&str>,
        column: &str,
        require_json: bool,
    ) -> Result<Option<&'a ColumnSpec>> {
        let entity: &'a Entity = match *self {
            Self::Unscoped => return Ok(None),
            Self::Entity(entity) => match alias {
                Some(alias) if alias != entity.table_name() => {
                    return Err(SqlError::UnknownAlias {
                        alias: alias.to_string(),
                        known: vec![entity.table_name().to_string()],
                    });
                }
                _ => entity,
            },
            Self::Aliases(aliases) => {
                let found = alias.and_then(|alias| aliases.iter().find(|(a, _)| a == alias));
                match found {
                    Some((_, entity)) => &**entity,
                    None => {
                        return Err(SqlError::UnknownAlias {
                            alias: alias.unwrap_or_default().to_string(),
                            known: aliases.iter().map(|(a, _)| a.clone()).collect(),
                        });
                    }
                }
            }
        };
        let spec = if require_json {
            entity.require_json_column(column)?
        } else {
            entity.require_column(column)?
        };
        Ok(Some(spec))
    }
}

/// Boolean operator joining conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl BoolOp {
    const fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Clause {
    Condition(Condition),
    Group(WhereBuilder),
}

#[derive(Debug, Clone, PartialEq)]
enum WhereState {
    Empty,
    Chained {
        op: Option<BoolOp>,
        clauses: Vec<Clause>,
    },
    Composed {
        op: BoolOp,
        clauses: Vec<Clause>,
    },
}

/// Accumulates conditions into a WHERE (or ON) fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereBuilder {
    state: WhereState,
}

impl Default for WhereBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WhereBuilder {
    /// An empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: WhereState::Empty,
        }
    }

    /// Returns `true` when no condition was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.state, WhereState::Empty)
    }

    /// Opens the builder with its first condition.
    pub fn open_where(&self, condition: Condition) -> Result<Self> {
        match self.state {
            WhereState::Empty => Ok(Self {
                state: WhereState::Chained {
                    op: None,
                    clauses: vec![Clause::Condition(condition)],
                },
            }),
            _ => Err(SqlError::WhereAlreadyOpened),
        }
    }

    /// Chains a condition with AND.
    pub fn and_where(&self, condition: Condition) -> Result<Self> {
        self.chain(BoolOp::And, condition)
    }

    /// Chains a condition with OR.
    pub fn or_where(&self, condition: Condition) -> Result<Self> {
        self.chain(BoolOp::Or, condition)
    }

    fn chain(&self, attempted: BoolOp, condition: Condition) -> Result<Self> {
        let clause = Clause::Condition(condition);
        let state = match &self.state {
            WhereState::Empty => WhereState::Chained {
                op: Some(attempted),
                clauses: vec![clause],
            },
            WhereState::Chained { op, clauses } => {
                check_operator(*op, attempted)?;
                let mut clauses = clauses.clone();
                clauses.push(clause);
                WhereState::Chained {
                    op: Some(attempted),
                    clauses,
                }
            }
            WhereState::Composed { op, clauses } => {
                check_operator(Some(*op), attempted)?;
                let mut clauses = clauses.clone();
                clauses.push(clause);
                WhereState::Composed { op: *op, clauses }
            }
        };
        Ok(Self { state })
    }

    /// Joins every non-empty builder with AND, each in parentheses.
    #[must_use]
    pub fn all(builders: &[Self]) -> Self {
        Self::compose(BoolOp::And, builders)
    }

    /// Joins every non-empty builder with OR, each in parentheses.
    #[must_use]
    pub fn either(builders: &[Self]) -> Self {
        Self::compose(BoolOp::Or, builders)
    }

    fn compose(op: BoolOp, builders: &[Self]) -> Self {
        let clauses: Vec<Clause> = builders
            .iter()
            .filter(|b| !b.is_empty())
            .cloned()
            .map(Clause::Group)
            .collect();
        if clauses.is_empty() {
            return Self::new();
        }
        Self {
            state: WhereState::Composed { op, clauses },
        }
    }

    /// Renders the accumulated conditions, `None` when empty.
    pub fn render(&self, scope: &Scope<'_>) -> Result<Option<PreparedQuery>> {
        let (op, clauses) = match &self.state {
            WhereState::Empty => return Ok(None),
            WhereState::Chained { op, clauses } => (op.unwrap_or(BoolOp::And), clauses),
            WhereState::Composed { op, clauses } => (*op, clauses),
        };
        let mut parts = Vec::with_capacity(clauses.len());
        for clause in clauses {
            match clause {
                Clause::Condition(condition) => parts.push(condition.render(scope)?),
                Clause::Group(group) => {
                    if let Some(rendered) = group.render(scope)? {
                        parts.push(rendered.brackets());
                    }
                }
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        let delimiter = PreparedQuery::raw(format!(" {} ", op.keyword()));
        PreparedQuery::join(parts, Some(&delimiter)).map(Some)
    }
}

fn check_operator(existing: Option<BoolOp>, attempted: BoolOp) -> Result<()> {
    match existing {
        Some(existing) if existing != attempted => Err(SqlError::MixedBoolExpr {
            existing: existing.keyword(),
            attempted: attempted.keyword(),
        }),
        _ => Ok(()),
    }
}
