//! Addressing of nested fields inside `json`/`jsonb` columns.

use crate::prepared::{quote_identifier, quote_literal};

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// Object key, rendered as a quoted literal.
    Key(String),
    /// Array index, rendered unquoted.
    Index(usize),
}

/// A reference to a nested value of a JSON column.
///
/// ```rust
/// use oxide_pg_core::json_path::JsonPath;
///
/// let path = JsonPath::new("meta").property("tags").index(0);
/// assert_eq!(path.render(), r#""meta"->'tags'->0"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath {
    alias: Option<String>,
    column: String,
    steps: Vec<PathStep>,
}

impl JsonPath {
    /// A path rooted at `column`.
    #[must_use]
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            alias: None,
            column: column.into(),
            steps: Vec::new(),
        }
    }

    /// A path rooted at `alias.column`.
    #[must_use]
    pub fn aliased(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            ..Self::new(column)
        }
    }

    /// Descends into `name`. A name made only of digits is an array index.
    #[must_use]
    pub fn property(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        let step = if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            name.parse().map_or(PathStep::Key(name), PathStep::Index)
        } else {
            PathStep::Key(name)
        };
        self.push(step)
    }

    /// Descends into array element `index`.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.push(PathStep::Index(index))
    }

    /// Appends pre-built steps.
    #[must_use]
    pub fn with_steps(&self, steps: &[PathStep]) -> Self {
        let mut path = self.clone();
        path.steps.extend_from_slice(steps);
        path
    }

    fn push(&self, step: PathStep) -> Self {
        let mut path = self.clone();
        path.steps.push(step);
        path
    }

    /// Root column.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Alias qualifying the root column.
    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Steps below the root column.
    #[must_use]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Returns `true` when the path has no steps.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Renders the path expression, e.g. `"u"."meta"->'a'->0`.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(alias) = &self.alias {
            out.push_str(&quote_identifier(alias));
            out.push('.');
        }
        out.push_str(&quote_identifier(&self.column));
        for step in &self.steps {
            out.push_str("->");
            match step {
                PathStep::Key(key) => out.push_str(&quote_literal(key)),
                PathStep::Index(index) => out.push_str(&index.to_string()),
            }
        }
        out
    }

    /// Renders the path with every step parenthesized, the way PostgreSQL
    /// echoes operator expressions in index definitions, e.g.
    /// `(("meta"->'tags')->0)`.
    #[must_use]
    pub fn render_nested(&self) -> String {
        let mut out = String::new();
        if let Some(alias) = &self.alias {
            out.push_str(&quote_identifier(alias));
            out.push('.');
        }
        out.push_str(&quote_identifier(&self.column));
        for step in &self.steps {
            let step = match step {
                PathStep::Key(key) => quote_literal(key),
                PathStep::Index(index) => index.to_string(),
            };
            out = format!("({out}->{step})");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_property_is_index() {
        let path = JsonPath::new("meta").property("items").property("2").property("name");
        assert_eq!(path.render(), r#""meta"->'items'->2->'name'"#);
        assert_eq!(
            path.steps(),
            &[
                PathStep::Key("items".into()),
                PathStep::Index(2),
                PathStep::Key("name".into()),
            ]
        );
    }

    #[test]
    fn test_aliased_path() {
        let path = JsonPath::aliased("u", "meta").property("isCool");
        assert_eq!(path.render(), r#""u"."meta"->'isCool'"#);
        assert_eq!(path.alias(), Some("u"));
    }

    #[test]
    fn test_key_is_escaped() {
        let path = JsonPath::new("meta").property("it's");
        assert_eq!(path.render(), r#""meta"->'it''s'"#);
    }

    #[test]
    fn test_nested_rendering_parenthesizes_each_step() {
        let path = JsonPath::new("meta").property("tags").index(0);
        assert_eq!(path.render_nested(), r#"(("meta"->'tags')->0)"#);
        assert_eq!(JsonPath::new("meta").render_nested(), r#""meta""#);
    }

    #[test]
    fn test_paths_are_persistent() {
        let root = JsonPath::new("meta");
        let child = root.property("a");
        assert!(root.is_root());
        assert!(!child.is_root());
    }
}
