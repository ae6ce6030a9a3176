//! Error types for query construction, row decoding, and schema diffing.

use thiserror::Error;

use crate::prepared::FinalizedQuery;

/// Boxed driver error carried by [`SqlError::QueryFailed`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building, executing, or diffing queries.
#[derive(Debug, Error)]
pub enum SqlError {
    /// The SQL type of a parameter could not be inferred.
    #[error("unknown query parameter type for value {value}; use an explicit cast helper")]
    UnknownParameterType {
        /// Debug rendering of the offending value.
        value: String,
    },

    /// A value cannot be serialized for the requested SQL type.
    #[error("value {value} cannot be sent as {sql_type}")]
    UnsupportedValue {
        /// Debug rendering of the offending value.
        value: String,
        /// Target SQL type name.
        sql_type: String,
    },

    /// A table, column, alias, or index name is not lower snake case.
    #[error("invalid {kind} name '{name}': expected lower_snake_case")]
    InvalidIdentifier {
        /// What kind of identifier was rejected.
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// An identifier PostgreSQL would silently truncate.
    #[error("{kind} name '{name}' is longer than 63 bytes")]
    IdentifierTooLong {
        /// What kind of identifier was rejected.
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// A template was given a different number of arguments than slots.
    #[error("template has {slots} slots but {args} arguments were given")]
    TemplateArity {
        /// Number of `{}` slots in the template.
        slots: usize,
        /// Number of arguments supplied.
        args: usize,
    },

    /// `join` was called without any query.
    #[error("cannot join an empty list of queries")]
    EmptyJoin,

    /// `open_where` was called on a builder that already holds a condition.
    #[error("where clause is already opened")]
    WhereAlreadyOpened,

    /// An AND chain and an OR chain were mixed on the same builder.
    #[error("cannot chain {attempted} onto a where clause chained with {existing}")]
    MixedBoolExpr {
        /// Operator the builder is bound to.
        existing: &'static str,
        /// Operator that was attempted.
        attempted: &'static str,
    },

    /// A condition referenced an alias that is not part of the statement.
    #[error("unknown alias '{alias}'; known aliases: [{}]", .known.join(", "))]
    UnknownAlias {
        /// The unresolved alias.
        alias: String,
        /// Aliases registered on the statement.
        known: Vec<String>,
    },

    /// An alias was used twice in one statement.
    #[error("alias '{0}' is already used in this statement")]
    DuplicateAlias(String),

    /// Two selections would come back under the same result label.
    #[error("result label '{0}' is produced twice in this statement")]
    DuplicateLabel(String),

    /// A select named no columns.
    #[error("select on {0} names no columns")]
    EmptySelection(String),

    /// A column is not declared on the entity.
    #[error("column '{column}' is not declared on {entity}")]
    UnknownColumn {
        /// Qualified entity name.
        entity: String,
        /// The unknown column.
        column: String,
    },

    /// A JSON path was rooted at a column that is not `json`/`jsonb`.
    #[error("column '{column}' of {entity} is not a json column")]
    NotJsonColumn {
        /// Qualified entity name.
        entity: String,
        /// The non-json column.
        column: String,
    },

    /// A column was declared twice on one entity.
    #[error("column '{column}' is declared twice on {entity}")]
    DuplicateColumn {
        /// Qualified entity name.
        entity: String,
        /// The duplicated column.
        column: String,
    },

    /// An entity with the same schema and table was registered twice.
    #[error("entity {0} is already registered")]
    DuplicateEntity(String),

    /// Two indexes with the same name were declared on one entity.
    #[error("index '{index}' is declared twice on {entity}")]
    DuplicateIndex {
        /// Qualified entity name.
        entity: String,
        /// The duplicated index name.
        index: String,
    },

    /// An index definition carried query parameters.
    #[error("index '{0}' must not contain query parameters")]
    ParameterizedIndex(String),

    /// A column default carried query parameters.
    #[error("default of column '{0}' must not contain query parameters")]
    ParameterizedDefault(String),

    /// An entity without fields was used where columns are required.
    #[error("entity {0} declares no fields")]
    EmptyEntity(String),

    /// An inserted row lacks one of the bound columns.
    #[error("insert row {row} is missing column '{column}'")]
    MissingInsertColumn {
        /// Zero-based position of the row in the insert.
        row: usize,
        /// The missing column.
        column: String,
    },

    /// An insert row was not a JSON object.
    #[error("insert row {0} is not an object")]
    InvalidInsertRow(usize),

    /// An INSERT was built without rows.
    #[error("cannot build an insert without rows")]
    EmptyInsert,

    /// A raw selection did not match its decoder.
    #[error("invalid value for '{key}': expected {expected}, got {value}")]
    InvalidValue {
        /// Result key of the raw selection.
        key: String,
        /// What the decoder expected.
        expected: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A reconstructed row could not be deserialized.
    #[error("failed to decode row: {0}")]
    Decode(#[from] serde_json::Error),

    /// More than one catalog column matched a declared column.
    #[error("column '{column}' of {entity} matches several existing columns: [{}]", .matches.join(", "))]
    AmbiguousColumn {
        /// Qualified entity name.
        entity: String,
        /// The declared column.
        column: String,
        /// Names of the matching catalog columns.
        matches: Vec<String>,
    },

    /// The database rejected a query.
    #[error("query failed: {source}\n  query: {query}")]
    QueryFailed {
        /// The query that was sent.
        query: Box<FinalizedQuery>,
        /// The driver error.
        #[source]
        source: BoxError,
    },
}

impl SqlError {
    /// Wraps a driver error together with the query that caused it.
    pub fn query_failed(query: &FinalizedQuery, source: impl Into<BoxError>) -> Self {
        Self::QueryFailed {
            query: Box::new(query.clone()),
            source: source.into(),
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, SqlError>;
