//! Entity metadata: tables, columns, indexes, and the process-wide registry.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{Result, SqlError};
use crate::json_path::JsonPath;
use crate::prepared::{quote_identifier, PreparedQuery};
use crate::value::{ColumnType, SqlType};

/// Returns `true` for lower snake case identifiers (`[a-z_][a-z0-9_]*`).
#[must_use]
pub fn is_snake_case(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Longest identifier PostgreSQL stores without truncating it
/// (`NAMEDATALEN - 1` bytes).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Fails with [`SqlError::InvalidIdentifier`] unless `name` is lower snake
/// case, and with [`SqlError::IdentifierTooLong`] when PostgreSQL would
/// truncate it.
pub fn validate_identifier(kind: &'static str, name: &str) -> Result<()> {
    if !is_snake_case(name) {
        return Err(SqlError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        });
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(SqlError::IdentifierTooLong {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Declaration of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    /// Declared type.
    pub column_type: ColumnType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Default expression, free of parameters.
    pub default: Option<PreparedQuery>,
    /// Former name of the column, used to detect renames.
    pub previous_name: Option<String>,
}

impl ColumnSpec {
    /// A NOT NULL column without default.
    #[must_use]
    pub fn new(column_type: impl Into<ColumnType>) -> Self {
        Self {
            column_type: column_type.into(),
            nullable: false,
            default: None,
            previous_name: None,
        }
    }

    /// Allows NULL.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default_sql(mut self, default: PreparedQuery) -> Self {
        self.default = Some(default);
        self
    }

    /// Records the former name of the column.
    #[must_use]
    pub fn previous_name(mut self, name: impl Into<String>) -> Self {
        self.previous_name = Some(name.into());
        self
    }

    /// Rendered default expression.
    #[must_use]
    pub fn default_text(&self) -> Option<String> {
        self.default.as_ref().map(|d| d.finalize().text)
    }

    /// Returns `true` for `json`/`jsonb` scalar columns.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        !self.column_type.is_array && self.column_type.sql_type.is_json()
    }
}

/// A named column of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Column declaration.
    pub spec: ColumnSpec,
}

/// One element of an index column list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexColumn {
    /// A plain column.
    Column(String),
    /// An expression over a JSON column.
    Path(JsonPath),
}

impl From<&str> for IndexColumn {
    fn from(name: &str) -> Self {
        Self::Column(name.to_string())
    }
}

impl From<JsonPath> for IndexColumn {
    fn from(path: JsonPath) -> Self {
        Self::Path(path)
    }
}

/// What an index covers.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexTarget {
    /// A list of columns or JSON paths.
    Columns(Vec<IndexColumn>),
    /// A raw fragment placed after `ON <table>`, e.g. `USING gin ("meta")`.
    Raw(PreparedQuery),
}

/// Declaration of one index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Covered columns or raw definition.
    pub target: IndexTarget,
    /// Whether the index is UNIQUE.
    pub unique: bool,
    /// Former name of the index, used to detect renames.
    pub previous_name: Option<String>,
}

impl IndexSpec {
    /// An index over the given columns or paths.
    #[must_use]
    pub fn on<I, C>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<IndexColumn>,
    {
        Self {
            name: name.into(),
            target: IndexTarget::Columns(columns.into_iter().map(Into::into).collect()),
            unique: false,
            previous_name: None,
        }
    }

    /// An index defined by a raw fragment.
    #[must_use]
    pub fn raw(name: impl Into<String>, fragment: PreparedQuery) -> Self {
        Self {
            name: name.into(),
            target: IndexTarget::Raw(fragment),
            unique: false,
            previous_name: None,
        }
    }

    /// Makes the index UNIQUE.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Records the former name of the index.
    #[must_use]
    pub fn previous_name(mut self, name: impl Into<String>) -> Self {
        self.previous_name = Some(name.into());
        self
    }

    /// The part of the definition following `ON <table> `.
    #[must_use]
    pub fn body(&self) -> String {
        match &self.target {
            IndexTarget::Raw(fragment) => fragment.finalize().text,
            IndexTarget::Columns(columns) => {
                let parts: Vec<String> = columns
                    .iter()
                    .map(|c| match c {
                        IndexColumn::Column(name) => quote_identifier(name),
                        IndexColumn::Path(path) => format!("({})", path.render_nested()),
                    })
                    .collect();
                format!("({})", parts.join(", "))
            }
        }
    }
}

/// A declared table.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    schema: String,
    table_name: String,
    fields: Vec<Field>,
    indexes: Vec<IndexSpec>,
}

impl Entity {
    /// Starts declaring `schema.table_name`.
    #[must_use]
    pub fn builder(schema: impl Into<String>, table_name: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            schema: schema.into(),
            table_name: table_name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Schema name.
    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Columns in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Looks up a column.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&ColumnSpec> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.spec)
    }

    /// Declared indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// `"schema"."table"`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table_name)
        )
    }

    /// `schema.table`, for messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{}.{}", self.schema, self.table_name)
    }

    /// Looks up a column, failing when it is not declared.
    pub fn require_column(&self, column: &str) -> Result<&ColumnSpec> {
        self.field(column).ok_or_else(|| SqlError::UnknownColumn {
            entity: self.display_name(),
            column: column.to_string(),
        })
    }

    /// Looks up a `json`/`jsonb` column usable as a path root.
    pub fn require_json_column(&self, column: &str) -> Result<&ColumnSpec> {
        let spec = self.require_column(column)?;
        if spec.is_json() {
            Ok(spec)
        } else {
            Err(SqlError::NotJsonColumn {
                entity: self.display_name(),
                column: column.to_string(),
            })
        }
    }

    /// Fails when the entity declares no columns.
    pub fn require_fields(&self) -> Result<()> {
        if self.fields.is_empty() {
            Err(SqlError::EmptyEntity(self.display_name()))
        } else {
            Ok(())
        }
    }
}

/// Builder for [`Entity`].
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    schema: String,
    table_name: String,
    fields: Vec<Field>,
    indexes: Vec<IndexSpec>,
}

impl EntityBuilder {
    /// Declares a column.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, spec: ColumnSpec) -> Self {
        self.fields.push(Field {
            name: name.into(),
            spec,
        });
        self
    }

    /// Shorthand for a NOT NULL column of `sql_type`.
    #[must_use]
    pub fn column(self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.field(name, ColumnSpec::new(sql_type))
    }

    /// Declares an index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Validates the declaration and freezes it.
    pub fn build(self) -> Result<Arc<Entity>> {
        validate_identifier("schema", &self.schema)?;
        validate_identifier("table", &self.table_name)?;

        let entity = Entity {
            schema: self.schema,
            table_name: self.table_name,
            fields: self.fields,
            indexes: self.indexes,
        };

        for (position, field) in entity.fields.iter().enumerate() {
            validate_identifier("column", &field.name)?;
            if let Some(previous) = &field.spec.previous_name {
                validate_identifier("column", previous)?;
            }
            if entity.fields[..position].iter().any(|f| f.name == field.name) {
                return Err(SqlError::DuplicateColumn {
                    entity: entity.display_name(),
                    column: field.name.clone(),
                });
            }
            if field
                .spec
                .default
                .as_ref()
                .is_some_and(|d| !d.params().is_empty())
            {
                return Err(SqlError::ParameterizedDefault(field.name.clone()));
            }
        }

        for (position, index) in entity.indexes.iter().enumerate() {
            validate_identifier("index", &index.name)?;
            if let Some(previous) = &index.previous_name {
                validate_identifier("index", previous)?;
            }
            if entity.indexes[..position].iter().any(|i| i.name == index.name) {
                return Err(SqlError::DuplicateIndex {
                    entity: entity.display_name(),
                    index: index.name.clone(),
                });
            }
            match &index.target {
                IndexTarget::Raw(fragment) => {
                    if !fragment.params().is_empty() {
                        return Err(SqlError::ParameterizedIndex(index.name.clone()));
                    }
                }
                IndexTarget::Columns(columns) => {
                    for column in columns {
                        match column {
                            IndexColumn::Column(name) => {
                                entity.require_column(name)?;
                            }
                            IndexColumn::Path(path) => {
                                entity.require_json_column(path.column())?;
                            }
                        }
                    }
                }
            }
        }

        Ok(Arc::new(entity))
    }
}

/// Registry of declared entities, keyed by schema and table.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<BTreeMap<(String, String), Arc<Entity>>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity. Each schema and table pair may be registered once.
    pub fn register(&self, entity: Arc<Entity>) -> Result<Arc<Entity>> {
        let key = (entity.schema.clone(), entity.table_name.clone());
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if entities.contains_key(&key) {
            return Err(SqlError::DuplicateEntity(entity.display_name()));
        }
        entities.insert(key, Arc::clone(&entity));
        Ok(entity)
    }

    /// Looks up an entity.
    #[must_use]
    pub fn get(&self, schema: &str, table_name: &str) -> Option<Arc<Entity>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(schema.to_string(), table_name.to_string()))
            .cloned()
    }

    /// All registered entities, ordered by schema and table.
    #[must_use]
    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

/// The process-wide registry.
pub fn registry() -> &'static EntityRegistry {
    static REGISTRY: OnceLock<EntityRegistry> = OnceLock::new();
    REGISTRY.get_or_init(EntityRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql;

    fn user() -> EntityBuilder {
        Entity::builder("public", "test_user")
            .column("id", SqlType::Uuid)
            .column("name", SqlType::Text)
            .column("meta", SqlType::Jsonb)
    }

    #[test]
    fn test_build_entity() {
        let entity = user().build().unwrap();
        assert_eq!(entity.qualified_name(), r#""public"."test_user""#);
        assert_eq!(
            entity.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "meta"]
        );
        assert!(entity.require_json_column("meta").is_ok());
        assert!(matches!(
            entity.require_json_column("name"),
            Err(SqlError::NotJsonColumn { .. })
        ));
    }

    #[test]
    fn test_rejects_non_snake_case() {
        let err = Entity::builder("public", "TestUser").build().unwrap_err();
        assert!(matches!(err, SqlError::InvalidIdentifier { kind: "table", .. }));

        let err = user().column("camelCase", SqlType::Text).build().unwrap_err();
        assert!(matches!(err, SqlError::InvalidIdentifier { kind: "column", .. }));
    }

    #[test]
    fn test_rejects_names_postgres_would_truncate() {
        let longest = "i".repeat(MAX_IDENTIFIER_LEN);
        assert!(user().index(IndexSpec::on(longest, ["name"])).build().is_ok());

        let err = user()
            .index(IndexSpec::on("i".repeat(MAX_IDENTIFIER_LEN + 1), ["name"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, SqlError::IdentifierTooLong { kind: "index", .. }));
    }

    #[test]
    fn test_rejects_duplicate_index() {
        let err = user()
            .index(IndexSpec::on("idx_user_name", ["name"]))
            .index(IndexSpec::on("idx_user_name", ["id"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, SqlError::DuplicateIndex { .. }));
    }

    #[test]
    fn test_rejects_parameterized_index_and_default() {
        let fragment = sql!("(\"name\") WHERE \"name\" = {}", "x").unwrap();
        let err = user()
            .index(IndexSpec::raw("idx_partial", fragment))
            .build()
            .unwrap_err();
        assert!(matches!(err, SqlError::ParameterizedIndex(_)));

        let err = user()
            .field(
                "note",
                ColumnSpec::new(SqlType::Text).default_sql(sql!("{}", "x").unwrap()),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, SqlError::ParameterizedDefault(_)));
    }

    #[test]
    fn test_index_on_unknown_column() {
        let err = user()
            .index(IndexSpec::on("idx_missing", ["missing"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn { .. }));
    }

    #[test]
    fn test_index_body() {
        let index = IndexSpec::on(
            "idx_meta",
            [IndexColumn::from("id"), JsonPath::new("meta").property("a").into()],
        );
        assert_eq!(index.body(), r#"("id", (("meta"->'a')))"#);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let registry = EntityRegistry::new();
        registry.register(user().build().unwrap()).unwrap();
        let err = registry.register(user().build().unwrap()).unwrap_err();
        assert!(matches!(err, SqlError::DuplicateEntity(_)));
        assert!(registry.get("public", "test_user").is_some());
        assert_eq!(registry.entities().len(), 1);
    }
}
