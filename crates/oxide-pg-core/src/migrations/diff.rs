//! Entity-versus-catalog diff engine.
//!
//! [`suggest_migrations`] reads the catalog strictly in sequence (schema,
//! table, indexes, columns) and emits batches in this order:
//!
//! 1. `Missing Schema`, then `Missing Table` followed by one `Missing Index`
//!    per declared index when the table does not exist yet;
//! 2. `Unused Index` drops;
//! 3. per declared column: `Column Renamed`, `Column Default Updated`,
//!    `Column Type Updated`, or `New Column`; then `Unused Column` drops;
//! 4. per declared index: `Index Updated` or `New Index`.
//!
//! Index creation comes after the column phase so that a new index may
//! reference a column added or renamed by the same plan.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::entity::{Entity, Field, IndexSpec};
use crate::error::{Result, SqlError};
use crate::prepared::PreparedQuery;

use super::catalog::{CatalogColumn, CatalogIndex, CatalogSource};
use super::{ddl, MigrationReason, SuggestedMigration};

// ================================================================
// Normalization
// ================================================================

static INDEX_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^create\s+(unique\s+)?index\s+(?:concurrently\s+)?(?:if\s+not\s+exists\s+)?\S+\s+on\s+(?:only\s+)?\S+\s*",
    )
    .expect("index head pattern is valid")
});

static LITERAL_CAST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"('(?:[^']|'')*')::(?:character varying|double precision|timestamp with(?:out)? time zone|[a-z_][a-z0-9_]*)(?:\[\])?",
    )
    .expect("literal cast pattern is valid")
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// The parts of an index definition that matter for comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexSignature {
    unique: bool,
    body: String,
}

/// Drops the outer pair of every `((...))` group whose inner pair spans the
/// whole group. Parentheses of function calls and inside string literals are
/// left alone.
fn strip_redundant_parens(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut partner = vec![None; chars.len()];
    let mut open = Vec::new();
    let mut in_literal = false;
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => open.push(i),
            ')' if !in_literal => {
                if let Some(start) = open.pop() {
                    partner[start] = Some(i);
                }
            }
            _ => {}
        }
    }

    let mut dropped = vec![false; chars.len()];
    for (start, end) in partner
        .iter()
        .enumerate()
        .filter_map(|(start, end)| end.map(|end| (start, end)))
    {
        let call = start > 0 && (chars[start - 1].is_alphanumeric() || chars[start - 1] == '_');
        if !call && start + 1 < end && partner[start + 1] == Some(end - 1) {
            dropped[start] = true;
            dropped[end] = true;
        }
    }
    chars
        .into_iter()
        .zip(dropped)
        .filter_map(|(c, drop)| (!drop).then_some(c))
        .collect()
}

/// Reduces a `CREATE INDEX` statement to its uniqueness and its body,
/// ignoring the index name, quoting, casing, `IF NOT EXISTS`, `USING btree`,
/// literal casts, whitespace, and doubled parentheses.
fn index_signature(definition: &str) -> IndexSignature {
    let lowered = definition.replace('"', "").to_lowercase();
    let lowered = lowered.trim();
    let (unique, rest) = INDEX_HEAD.captures(lowered).map_or((false, lowered), |caps| {
        let end = caps.get(0).map_or(0, |m| m.end());
        (caps.get(1).is_some(), &lowered[end..])
    });
    let rest = rest.replacen("using btree", "", 1);
    let rest = LITERAL_CAST.replace_all(&rest, "$1");
    IndexSignature {
        unique,
        body: strip_redundant_parens(&WHITESPACE.replace_all(&rest, "")),
    }
}

/// Normalizes a default expression: identifier quotes removed, literal casts
/// removed, whitespace collapsed.
fn normalize_default(expression: &str) -> String {
    let unquoted = expression.replace('"', "");
    let uncast = LITERAL_CAST.replace_all(&unquoted, "$1");
    WHITESPACE.replace_all(uncast.trim(), " ").into_owned()
}

// ================================================================
// Plan accumulation
// ================================================================

struct Plan<'a> {
    entity: &'a Entity,
    migrations: Vec<SuggestedMigration>,
}

impl<'a> Plan<'a> {
    const fn new(entity: &'a Entity) -> Self {
        Self {
            entity,
            migrations: Vec::new(),
        }
    }

    fn push(&mut self, reason: MigrationReason, queries: &[PreparedQuery]) {
        debug!(
            entity = %self.entity.display_name(),
            reason = %reason,
            queries = queries.len(),
            "Suggesting migration"
        );
        self.migrations.push(SuggestedMigration::new(
            reason,
            queries.iter().map(PreparedQuery::finalize).collect(),
        ));
    }
}

// ================================================================
// Index diffing
// ================================================================

fn find_index<'c>(existing: &'c [CatalogIndex], name: &str) -> Option<&'c CatalogIndex> {
    existing.iter().find(|index| index.name == name)
}

/// The catalog index a declared index corresponds to: same name, or its
/// previous name when the new name does not exist yet.
fn matching_index<'c>(
    existing: &'c [CatalogIndex],
    index: &IndexSpec,
) -> Option<&'c CatalogIndex> {
    find_index(existing, &index.name).or_else(|| {
        index
            .previous_name
            .as_deref()
            .and_then(|previous| find_index(existing, previous))
    })
}

fn diff_unused_indexes(plan: &mut Plan<'_>, existing: &[CatalogIndex]) {
    let claimed: BTreeSet<&str> = plan
        .entity
        .indexes()
        .iter()
        .filter_map(|index| matching_index(existing, index))
        .map(|index| index.name.as_str())
        .collect();
    for index in existing {
        if !claimed.contains(index.name.as_str()) {
            let drop = ddl::drop_index(plan.entity.schema(), &index.name);
            plan.push(MigrationReason::UnusedIndex, &[drop]);
        }
    }
}

fn diff_declared_indexes(plan: &mut Plan<'_>, existing: &[CatalogIndex]) {
    let entity = plan.entity;
    let schema = entity.schema();
    for index in entity.indexes() {
        let create = ddl::create_index(entity, index);
        let Some(current) = matching_index(existing, index) else {
            plan.push(MigrationReason::NewIndex, &[create]);
            continue;
        };
        let unchanged = index_signature(&current.definition)
            == index_signature(&create.finalize().text);
        if current.name == index.name {
            if !unchanged {
                let drop = ddl::drop_index(schema, &current.name);
                plan.push(MigrationReason::IndexUpdated, &[drop, create]);
            }
        } else if unchanged {
            let rename = ddl::rename_index(schema, &current.name, &index.name);
            plan.push(MigrationReason::IndexUpdated, &[rename]);
        } else {
            let drop = ddl::drop_index(schema, &current.name);
            plan.push(MigrationReason::IndexUpdated, &[drop, create]);
        }
    }
}

// ================================================================
// Column diffing
// ================================================================

fn matching_columns<'c>(
    existing: &'c [CatalogColumn],
    field: &Field,
) -> Vec<&'c CatalogColumn> {
    existing
        .iter()
        .filter(|column| {
            column.name == field.name
                || field.spec.previous_name.as_deref() == Some(column.name.as_str())
        })
        .collect()
}

fn diff_column(plan: &mut Plan<'_>, field: &Field, current: &CatalogColumn) {
    let entity = plan.entity;
    let name = field.name.as_str();
    let spec = &field.spec;

    if current.name != name {
        let rename = ddl::rename_column(entity, &current.name, name);
        plan.push(MigrationReason::ColumnRenamed, &[rename]);
    }

    match (&spec.default, &current.column_default) {
        (None, Some(_)) => {
            plan.push(
                MigrationReason::ColumnDefaultUpdated,
                &[ddl::drop_default(entity, name)],
            );
        }
        (Some(default), existing) => {
            let declared = normalize_default(&default.finalize().text);
            if existing.as_deref().map(normalize_default) != Some(declared) {
                plan.push(
                    MigrationReason::ColumnDefaultUpdated,
                    &[ddl::set_default(entity, name, default)],
                );
            }
        }
        (None, None) => {}
    }

    if !spec
        .column_type
        .matches_catalog(&current.data_type, &current.udt_name)
    {
        plan.push(
            MigrationReason::ColumnTypeUpdated,
            &[ddl::alter_type(entity, name, spec)],
        );
    }

    if current.is_nullable != spec.nullable {
        plan.push(
            MigrationReason::ColumnTypeUpdated,
            &[ddl::alter_nullability(entity, name, spec.nullable)],
        );
    }
}

fn diff_columns(plan: &mut Plan<'_>, existing: &[CatalogColumn]) -> Result<()> {
    let entity = plan.entity;
    let mut claimed = BTreeSet::new();
    for field in entity.fields() {
        match matching_columns(existing, field).as_slice() {
            [] => {
                let add = ddl::add_column(entity, &field.name, &field.spec);
                plan.push(MigrationReason::NewColumn, &[add]);
            }
            [current] => {
                claimed.insert(current.name.clone());
                diff_column(plan, field, current);
            }
            several => {
                return Err(SqlError::AmbiguousColumn {
                    entity: entity.display_name(),
                    column: field.name.clone(),
                    matches: several.iter().map(|c| c.name.clone()).collect(),
                });
            }
        }
    }
    for column in existing {
        if !claimed.contains(&column.name) {
            let drop = ddl::drop_column(entity, &column.name);
            plan.push(MigrationReason::UnusedColumn, &[drop]);
        }
    }
    Ok(())
}

// ================================================================
// Entry point
// ================================================================

/// Computes the batches that bring the catalog in line with `entity`.
///
/// Nothing is executed. Running the same diff twice against the same
/// catalog yields the same plan, and diffing again after the plan was
/// applied yields an empty one.
pub async fn suggest_migrations<C: CatalogSource>(
    entity: &Entity,
    catalog: &mut C,
) -> Result<Vec<SuggestedMigration>> {
    let schema = entity.schema();
    let table = entity.table_name();
    let mut plan = Plan::new(entity);

    let schema_exists = catalog.schema_exists(schema).await?;
    if !schema_exists {
        plan.push(MigrationReason::MissingSchema, &[ddl::create_schema(schema)]);
    }

    if !schema_exists || !catalog.table_exists(schema, table).await? {
        plan.push(MigrationReason::MissingTable, &[ddl::create_table(entity)?]);
        for index in entity.indexes() {
            plan.push(
                MigrationReason::MissingIndex,
                &[ddl::create_index(entity, index)],
            );
        }
        return Ok(plan.migrations);
    }

    let indexes = catalog.indexes(schema, table).await?;
    let columns = catalog.columns(schema, table).await?;

    diff_unused_indexes(&mut plan, &indexes);
    diff_columns(&mut plan, &columns)?;
    diff_declared_indexes(&mut plan, &indexes);

    Ok(plan.migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ColumnSpec;
    use crate::json_path::JsonPath;
    use crate::migrations::CatalogSnapshot;
    use crate::value::SqlType;

    // ============================================================
    // Helpers
    // ============================================================

    fn catalog_column(name: &str, data_type: &str, udt_name: &str) -> CatalogColumn {
        CatalogColumn {
            name: name.to_string(),
            is_nullable: false,
            column_default: None,
            data_type: data_type.to_string(),
            udt_name: udt_name.to_string(),
        }
    }

    fn texts(plan: &[SuggestedMigration]) -> Vec<(MigrationReason, Vec<String>)> {
        plan.iter()
            .map(|m| {
                (
                    m.reason,
                    m.queries.iter().map(|q| q.text.clone()).collect(),
                )
            })
            .collect()
    }

    // ============================================================
    // Normalization
    // ============================================================

    #[test]
    fn catalog_and_generated_index_definitions_agree() {
        let live = "CREATE UNIQUE INDEX idx_user_name ON public.test_user USING btree (name, id)";
        let generated =
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_user_name" ON "public"."test_user" ("name", "id")"#;
        assert_eq!(index_signature(live), index_signature(generated));
    }

    #[test]
    fn uniqueness_and_columns_are_significant() {
        let plain = index_signature(r#"CREATE INDEX "i" ON "s"."t" ("name")"#);
        let unique = index_signature(r#"CREATE UNIQUE INDEX "i" ON "s"."t" ("name")"#);
        let other = index_signature(r#"CREATE INDEX "i" ON "s"."t" ("id")"#);
        assert_ne!(plain, unique);
        assert_ne!(plain, other);
        assert_eq!(plain.body, "(name)");
    }

    #[test]
    fn non_btree_methods_are_kept() {
        let live = index_signature("CREATE INDEX idx_meta ON public.t USING gin (meta)");
        let generated = index_signature(r#"CREATE INDEX IF NOT EXISTS "idx_meta" ON "public"."t" USING gin ("meta")"#);
        assert_eq!(live, generated);
        assert_eq!(live.body, "usinggin(meta)");
    }

    #[test]
    fn doubled_parentheses_are_collapsed() {
        assert_eq!(strip_redundant_parens("(((meta->'a')))"), "(meta->'a')");
        assert_eq!(strip_redundant_parens("((meta->'a'))"), "(meta->'a')");
        assert_eq!(strip_redundant_parens("(lower((name)))"), "lower((name))");
        assert_eq!(strip_redundant_parens("(a,b)"), "(a,b)");
        assert_eq!(strip_redundant_parens("('((x))')"), "('((x))')");
    }

    #[test]
    fn defaults_ignore_literal_casts_and_spacing() {
        assert_eq!(normalize_default("'draft'::character varying"), "'draft'");
        assert_eq!(normalize_default("'{}'::jsonb"), "'{}'");
        assert_eq!(normalize_default("now( )"), "now( )");
        assert_eq!(normalize_default("  \"x\"  +   1 "), "x + 1");
        assert_ne!(normalize_default("'a'"), normalize_default("'b'"));
    }

    // ============================================================
    // Column diffing
    // ============================================================

    #[tokio::test]
    async fn renamed_column_uses_new_name_afterwards() {
        let entity = Entity::builder("public", "account")
            .field(
                "display_name",
                ColumnSpec::new(SqlType::Text).previous_name("nickname"),
            )
            .build()
            .unwrap();
        let mut catalog = CatalogSnapshot::new().with_table(
            "public",
            "account",
            vec![catalog_column("nickname", "character varying", "varchar")],
            vec![],
        );
        let plan = suggest_migrations(&entity, &mut catalog).await.unwrap();
        assert_eq!(
            texts(&plan),
            vec![
                (
                    MigrationReason::ColumnRenamed,
                    vec![r#"ALTER TABLE "public"."account" RENAME COLUMN "nickname" TO "display_name""#.to_string()]
                ),
                (
                    MigrationReason::ColumnTypeUpdated,
                    vec![r#"ALTER TABLE "public"."account" ALTER COLUMN "display_name" TYPE text USING "display_name"::text"#.to_string()]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn default_changes() {
        let entity = Entity::builder("public", "job")
            .field(
                "state",
                ColumnSpec::new(SqlType::Text).default_sql(PreparedQuery::raw("'queued'")),
            )
            .column("attempts", SqlType::Integer)
            .build()
            .unwrap();
        let mut state = catalog_column("state", "text", "text");
        state.column_default = Some("'draft'::text".to_string());
        let mut attempts = catalog_column("attempts", "integer", "int4");
        attempts.column_default = Some("0".to_string());
        let mut catalog =
            CatalogSnapshot::new().with_table("public", "job", vec![state, attempts], vec![]);

        let plan = suggest_migrations(&entity, &mut catalog).await.unwrap();
        assert_eq!(
            texts(&plan),
            vec![
                (
                    MigrationReason::ColumnDefaultUpdated,
                    vec![r#"ALTER TABLE "public"."job" ALTER COLUMN "state" SET DEFAULT 'queued'"#.to_string()]
                ),
                (
                    MigrationReason::ColumnDefaultUpdated,
                    vec![r#"ALTER TABLE "public"."job" ALTER COLUMN "attempts" DROP DEFAULT"#.to_string()]
                ),
            ]
        );
    }

    #[tokio::test]
    async fn equivalent_default_is_left_alone() {
        let entity = Entity::builder("public", "job")
            .field(
                "state",
                ColumnSpec::new(SqlType::Text).default_sql(PreparedQuery::raw("'queued'")),
            )
            .build()
            .unwrap();
        let mut state = catalog_column("state", "text", "text");
        state.column_default = Some("'queued'::text".to_string());
        let mut catalog = CatalogSnapshot::new().with_table("public", "job", vec![state], vec![]);
        assert!(suggest_migrations(&entity, &mut catalog)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn nullability_change_detected() {
        let entity = Entity::builder("public", "job")
            .field("note", ColumnSpec::new(SqlType::Text).nullable())
            .build()
            .unwrap();
        let mut catalog = CatalogSnapshot::new().with_table(
            "public",
            "job",
            vec![catalog_column("note", "text", "text")],
            vec![],
        );
        let plan = suggest_migrations(&entity, &mut catalog).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].reason, MigrationReason::ColumnTypeUpdated);
        assert!(plan[0].queries[0].text.ends_with(r#"ALTER COLUMN "note" DROP NOT NULL"#));
    }

    #[tokio::test]
    async fn ambiguous_rename_aborts() {
        let entity = Entity::builder("public", "account")
            .field(
                "display_name",
                ColumnSpec::new(SqlType::Text).previous_name("nickname"),
            )
            .build()
            .unwrap();
        let mut catalog = CatalogSnapshot::new().with_table(
            "public",
            "account",
            vec![
                catalog_column("nickname", "text", "text"),
                catalog_column("display_name", "text", "text"),
            ],
            vec![],
        );
        let err = suggest_migrations(&entity, &mut catalog).await.unwrap_err();
        assert!(matches!(
            err,
            SqlError::AmbiguousColumn { ref column, ref matches, .. }
                if column == "display_name" && matches.len() == 2
        ));
    }

    // ============================================================
    // Index diffing
    // ============================================================

    #[tokio::test]
    async fn index_rename_hint() {
        let entity = Entity::builder("public", "account")
            .column("email", SqlType::Text)
            .index(IndexSpec::on("idx_account_email", ["email"]).previous_name("account_email_idx"))
            .build()
            .unwrap();
        let mut catalog = CatalogSnapshot::new().with_table(
            "public",
            "account",
            vec![catalog_column("email", "text", "text")],
            vec![CatalogIndex {
                name: "account_email_idx".to_string(),
                definition: "CREATE INDEX account_email_idx ON public.account USING btree (email)"
                    .to_string(),
            }],
        );
        let plan = suggest_migrations(&entity, &mut catalog).await.unwrap();
        assert_eq!(
            texts(&plan),
            vec![(
                MigrationReason::IndexUpdated,
                vec![r#"ALTER INDEX IF EXISTS "public"."account_email_idx" RENAME TO "idx_account_email""#.to_string()]
            )]
        );
    }

    #[tokio::test]
    async fn json_path_index_matches_catalog_definition() {
        let entity = Entity::builder("public", "doc")
            .column("meta", SqlType::Jsonb)
            .index(IndexSpec::on(
                "idx_doc_meta_a",
                [JsonPath::new("meta").property("a")],
            ))
            .index(IndexSpec::on(
                "idx_doc_meta_pair",
                [
                    JsonPath::new("meta").property("a"),
                    JsonPath::new("meta").property("tags").index(0),
                ],
            ))
            .build()
            .unwrap();
        let mut catalog = CatalogSnapshot::new().with_table(
            "public",
            "doc",
            vec![catalog_column("meta", "jsonb", "jsonb")],
            vec![
                CatalogIndex {
                    name: "idx_doc_meta_a".to_string(),
                    definition:
                        "CREATE INDEX idx_doc_meta_a ON public.doc USING btree (((meta -> 'a'::text)))"
                            .to_string(),
                },
                CatalogIndex {
                    name: "idx_doc_meta_pair".to_string(),
                    definition: "CREATE INDEX idx_doc_meta_pair ON public.doc USING btree (((meta -> 'a'::text)), (((meta -> 'tags'::text) -> 0)))"
                        .to_string(),
                },
            ],
        );
        let plan = suggest_migrations(&entity, &mut catalog).await.unwrap();
        assert!(plan.is_empty(), "unexpected plan: {:?}", texts(&plan));
    }

    #[tokio::test]
    async fn unused_index_dropped_before_columns() {
        let entity = Entity::builder("public", "account")
            .column("email", SqlType::Text)
            .column("age", SqlType::Integer)
            .index(IndexSpec::on("idx_account_age", ["age"]))
            .build()
            .unwrap();
        let mut catalog = CatalogSnapshot::new().with_table(
            "public",
            "account",
            vec![catalog_column("email", "text", "text")],
            vec![CatalogIndex {
                name: "idx_legacy".to_string(),
                definition: "CREATE INDEX idx_legacy ON public.account USING btree (email)"
                    .to_string(),
            }],
        );
        let plan = suggest_migrations(&entity, &mut catalog).await.unwrap();
        let reasons: Vec<MigrationReason> = plan.iter().map(|m| m.reason).collect();
        assert_eq!(
            reasons,
            vec![
                MigrationReason::UnusedIndex,
                MigrationReason::NewColumn,
                MigrationReason::NewIndex,
            ]
        );
    }
}
