//! Query builders.
//!
//! - [`comparator`]: column comparisons producing conditions.
//! - [`where_clause`]: AND/OR composition of conditions.
//! - [`select`]: SELECT against one entity.
//! - [`join`]: SELECT across aliased, joined entities.
//! - [`insert`]: multi-row INSERT.
//! - [`row`]: decoding of raw selections.
//!
//! Every builder is a persistent value: accumulating calls take `&self` and
//! return a new builder.

pub mod comparator;
pub mod insert;
pub mod join;
pub mod row;
pub mod select;
pub mod where_clause;

use crate::error::Result;
use crate::prepared::{quote_identifier, PreparedQuery};
use crate::sql;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    #[default]
    Asc,
    /// Descending order (DESC)
    Desc,
}

impl OrderDirection {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// OFFSET/LIMIT window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Rows to skip.
    pub offset: Option<u32>,
    /// Maximum number of rows.
    pub limit: Option<u32>,
}

impl Page {
    /// A window of `limit` rows starting at `offset`.
    #[must_use]
    pub const fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }

    /// The first `limit` rows.
    #[must_use]
    pub const fn limit(limit: u32) -> Self {
        Self {
            offset: None,
            limit: Some(limit),
        }
    }
}

/// Lock strength of a row-locking clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrength {
    /// `FOR UPDATE`
    Update,
    /// `FOR NO KEY UPDATE`
    NoKeyUpdate,
    /// `FOR SHARE`
    Share,
    /// `FOR KEY SHARE`
    KeyShare,
}

/// Behavior when a row is already locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    /// Wait for the lock.
    #[default]
    Wait,
    /// `NOWAIT`
    NoWait,
    /// `SKIP LOCKED`
    SkipLocked,
}

/// A trailing `FOR ...` row-locking clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLock {
    strength: LockStrength,
    wait: LockWait,
    of: Option<String>,
}

impl RowLock {
    /// A lock of the given strength.
    #[must_use]
    pub const fn new(strength: LockStrength) -> Self {
        Self {
            strength,
            wait: LockWait::Wait,
            of: None,
        }
    }

    /// `FOR UPDATE`
    #[must_use]
    pub const fn update() -> Self {
        Self::new(LockStrength::Update)
    }

    /// Fails instead of waiting.
    #[must_use]
    pub fn nowait(mut self) -> Self {
        self.wait = LockWait::NoWait;
        self
    }

    /// Skips locked rows.
    #[must_use]
    pub fn skip_locked(mut self) -> Self {
        self.wait = LockWait::SkipLocked;
        self
    }

    /// Restricts the lock to one alias.
    #[must_use]
    pub fn of(mut self, alias: &str) -> Self {
        self.of = Some(String::from(alias));
        self
    }

    pub(crate) fn target(&self) -> Option<&str> {
        self.of.as_deref()
    }

    fn to_sql(&self) -> String {
        let mut sql = String::from(match self.strength {
            LockStrength::Update => "FOR UPDATE",
            LockStrength::NoKeyUpdate => "FOR NO KEY UPDATE",
            LockStrength::Share => "FOR SHARE",
            LockStrength::KeyShare => "FOR KEY SHARE",
        });
        if let Some(of) = &self.of {
            sql.push_str(" OF ");
            sql.push_str(&quote_identifier(of));
        }
        match self.wait {
            LockWait::Wait => {}
            LockWait::NoWait => sql.push_str(" NOWAIT"),
            LockWait::SkipLocked => sql.push_str(" SKIP LOCKED"),
        }
        sql
    }
}

/// Clauses shared by the select and join builders.
#[derive(Debug, Clone, Default, PartialEq)]
struct Clauses {
    wheres: Vec<PreparedQuery>,
    group_by: Vec<PreparedQuery>,
    order_by: Vec<PreparedQuery>,
    lock: Option<RowLock>,
}

impl Clauses {
    fn order_entry(expr: String, direction: OrderDirection) -> PreparedQuery {
        PreparedQuery::raw(format!("{expr} {}", direction.keyword()))
    }

    /// Appends WHERE, GROUP BY, ORDER BY, OFFSET/LIMIT and lock clauses to `head`.
    fn render(&self, head: PreparedQuery, page: Option<Page>) -> Result<PreparedQuery> {
        let mut query = head;
        if !self.wheres.is_empty() {
            let condition = if self.wheres.len() == 1 {
                self.wheres[0].clone()
            } else {
                PreparedQuery::join(
                    self.wheres.iter().map(PreparedQuery::brackets),
                    Some(&PreparedQuery::raw(" AND ")),
                )?
            };
            query.append(condition.prefix(" WHERE "));
        }
        if !self.group_by.is_empty() {
            let group = PreparedQuery::join(
                self.group_by.iter().cloned(),
                Some(&PreparedQuery::raw(", ")),
            )?;
            query.append(group.wrap(" GROUP BY (", ")"));
        }
        if !self.order_by.is_empty() {
            let order = PreparedQuery::join(
                self.order_by.iter().cloned(),
                Some(&PreparedQuery::raw(", ")),
            )?;
            query.append(order.prefix(" ORDER BY "));
        }
        if let Some(page) = page {
            if let Some(offset) = page.offset {
                query.append(sql!(" OFFSET {}", offset)?);
            }
            if let Some(limit) = page.limit {
                query.append(sql!(" LIMIT {}", limit)?);
            }
        }
        if let Some(lock) = &self.lock {
            query.append(PreparedQuery::raw(format!(" {}", lock.to_sql())));
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_rendering() {
        assert_eq!(RowLock::update().to_sql(), "FOR UPDATE");
        assert_eq!(
            RowLock::update().nowait().of("u").to_sql(),
            r#"FOR UPDATE OF "u" NOWAIT"#
        );
        assert_eq!(
            RowLock::new(LockStrength::Share).skip_locked().to_sql(),
            "FOR SHARE SKIP LOCKED"
        );
    }

    #[test]
    fn test_pagination_placeholders() {
        let clauses = Clauses::default();
        let query = clauses
            .render(PreparedQuery::raw("SELECT 1"), Some(Page::new(20, 10)))
            .unwrap()
            .finalize();
        assert_eq!(
            query.text,
            "SELECT 1 OFFSET $1::double precision LIMIT $2::double precision"
        );
    }
}
