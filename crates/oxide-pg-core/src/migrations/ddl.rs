//! PostgreSQL DDL generation.
//!
//! Every statement is idempotent (`IF NOT EXISTS` / `IF EXISTS`) where
//! PostgreSQL allows it, so a partially applied plan can be resumed.

use crate::entity::{ColumnSpec, Entity, IndexSpec};
use crate::error::Result;
use crate::prepared::{quote_identifier, PreparedQuery};

fn column_definition(name: &str, spec: &ColumnSpec) -> PreparedQuery {
    let mut def = format!("{} {}", quote_identifier(name), spec.column_type.ddl());
    if !spec.nullable {
        def.push_str(" NOT NULL");
    }
    let mut query = PreparedQuery::raw(def);
    if let Some(default) = &spec.default {
        query.append(default.prefix(" DEFAULT "));
    }
    query
}

/// `CREATE SCHEMA IF NOT EXISTS "schema"`
#[must_use]
pub fn create_schema(schema: &str) -> PreparedQuery {
    PreparedQuery::raw(format!(
        "CREATE SCHEMA IF NOT EXISTS {}",
        quote_identifier(schema)
    ))
}

/// `CREATE TABLE IF NOT EXISTS` with every declared column.
pub fn create_table(entity: &Entity) -> Result<PreparedQuery> {
    entity.require_fields()?;
    let columns = entity
        .fields()
        .iter()
        .map(|field| column_definition(&field.name, &field.spec));
    let columns = PreparedQuery::join(columns, Some(&PreparedQuery::raw(", ")))?;
    Ok(columns.wrap(
        &format!("CREATE TABLE IF NOT EXISTS {} (", entity.qualified_name()),
        ")",
    ))
}

/// `CREATE [UNIQUE] INDEX IF NOT EXISTS "name" ON "schema"."table" ...`
#[must_use]
pub fn create_index(entity: &Entity, index: &IndexSpec) -> PreparedQuery {
    create_index_named(entity, index, &index.name)
}

/// Like [`create_index`], under another name.
#[must_use]
pub fn create_index_named(entity: &Entity, index: &IndexSpec, name: &str) -> PreparedQuery {
    PreparedQuery::raw(format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} {}",
        if index.unique { "UNIQUE " } else { "" },
        quote_identifier(name),
        entity.qualified_name(),
        index.body()
    ))
}

/// `DROP INDEX IF EXISTS "schema"."name"`
#[must_use]
pub fn drop_index(schema: &str, name: &str) -> PreparedQuery {
    PreparedQuery::raw(format!(
        "DROP INDEX IF EXISTS {}.{}",
        quote_identifier(schema),
        quote_identifier(name)
    ))
}

/// `ALTER INDEX IF EXISTS "schema"."old" RENAME TO "new"`
#[must_use]
pub fn rename_index(schema: &str, from: &str, to: &str) -> PreparedQuery {
    PreparedQuery::raw(format!(
        "ALTER INDEX IF EXISTS {}.{} RENAME TO {}",
        quote_identifier(schema),
        quote_identifier(from),
        quote_identifier(to)
    ))
}

fn alter_table(entity: &Entity, action: &str) -> PreparedQuery {
    PreparedQuery::raw(format!("ALTER TABLE {} {action}", entity.qualified_name()))
}

/// `ALTER TABLE ... ADD COLUMN IF NOT EXISTS ...`
#[must_use]
pub fn add_column(entity: &Entity, name: &str, spec: &ColumnSpec) -> PreparedQuery {
    alter_table(entity, "ADD COLUMN IF NOT EXISTS ").concat(&column_definition(name, spec))
}

/// `ALTER TABLE ... RENAME COLUMN "from" TO "to"`
#[must_use]
pub fn rename_column(entity: &Entity, from: &str, to: &str) -> PreparedQuery {
    alter_table(
        entity,
        &format!(
            "RENAME COLUMN {} TO {}",
            quote_identifier(from),
            quote_identifier(to)
        ),
    )
}

/// `ALTER TABLE ... ALTER COLUMN "name" DROP DEFAULT`
#[must_use]
pub fn drop_default(entity: &Entity, name: &str) -> PreparedQuery {
    alter_table(
        entity,
        &format!("ALTER COLUMN {} DROP DEFAULT", quote_identifier(name)),
    )
}

/// `ALTER TABLE ... ALTER COLUMN "name" SET DEFAULT ...`
#[must_use]
pub fn set_default(entity: &Entity, name: &str, default: &PreparedQuery) -> PreparedQuery {
    alter_table(
        entity,
        &format!("ALTER COLUMN {} SET DEFAULT ", quote_identifier(name)),
    )
    .concat(default)
}

/// `ALTER TABLE ... ALTER COLUMN "name" TYPE ... USING "name"::...`
#[must_use]
pub fn alter_type(entity: &Entity, name: &str, spec: &ColumnSpec) -> PreparedQuery {
    let column = quote_identifier(name);
    let ty = spec.column_type.ddl();
    alter_table(
        entity,
        &format!("ALTER COLUMN {column} TYPE {ty} USING {column}::{ty}"),
    )
}

/// `ALTER TABLE ... ALTER COLUMN "name" SET NOT NULL` or `DROP NOT NULL`
#[must_use]
pub fn alter_nullability(entity: &Entity, name: &str, nullable: bool) -> PreparedQuery {
    let action = if nullable { "DROP" } else { "SET" };
    alter_table(
        entity,
        &format!("ALTER COLUMN {} {action} NOT NULL", quote_identifier(name)),
    )
}

/// `ALTER TABLE ... DROP COLUMN IF EXISTS "name"`
#[must_use]
pub fn drop_column(entity: &Entity, name: &str) -> PreparedQuery {
    alter_table(
        entity,
        &format!("DROP COLUMN IF EXISTS {}", quote_identifier(name)),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::value::SqlType;

    fn user() -> Arc<Entity> {
        Entity::builder("public", "test_user")
            .column("id", SqlType::Uuid)
            .column("name", SqlType::Text)
            .column("meta", SqlType::Jsonb)
            .index(IndexSpec::on("idx_user_name", ["name"]).unique())
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_table() {
        let query = create_table(&user()).unwrap().finalize();
        assert_eq!(
            query.text,
            r#"CREATE TABLE IF NOT EXISTS "public"."test_user" ("id" uuid NOT NULL, "name" text NOT NULL, "meta" jsonb NOT NULL)"#
        );
        assert!(query.values.is_empty());
    }

    #[test]
    fn test_create_table_with_default_and_nullable() {
        let entity = Entity::builder("app", "job")
            .field(
                "created_at",
                ColumnSpec::new(SqlType::Timestamp).default_sql(PreparedQuery::raw("now()")),
            )
            .field("note", ColumnSpec::new(SqlType::Text).nullable())
            .build()
            .unwrap();
        assert_eq!(
            create_table(&entity).unwrap().finalize().text,
            r#"CREATE TABLE IF NOT EXISTS "app"."job" ("created_at" timestamp NOT NULL DEFAULT now(), "note" text)"#
        );
    }

    #[test]
    fn test_index_statements() {
        let entity = user();
        let index = &entity.indexes()[0];
        assert_eq!(
            create_index(&entity, index).finalize().text,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "idx_user_name" ON "public"."test_user" ("name")"#
        );
        assert_eq!(
            drop_index("public", "idx_user_name").finalize().text,
            r#"DROP INDEX IF EXISTS "public"."idx_user_name""#
        );
        assert_eq!(
            rename_index("public", "old_idx", "new_idx").finalize().text,
            r#"ALTER INDEX IF EXISTS "public"."old_idx" RENAME TO "new_idx""#
        );
    }

    #[test]
    fn test_column_statements() {
        let entity = user();
        let spec = ColumnSpec::new(SqlType::Integer);
        assert_eq!(
            alter_type(&entity, "name", &spec).finalize().text,
            r#"ALTER TABLE "public"."test_user" ALTER COLUMN "name" TYPE integer USING "name"::integer"#
        );
        assert_eq!(
            add_column(&entity, "age", &spec).finalize().text,
            r#"ALTER TABLE "public"."test_user" ADD COLUMN IF NOT EXISTS "age" integer NOT NULL"#
        );
        assert_eq!(
            set_default(&entity, "age", &PreparedQuery::raw("0")).finalize().text,
            r#"ALTER TABLE "public"."test_user" ALTER COLUMN "age" SET DEFAULT 0"#
        );
        assert_eq!(
            rename_column(&entity, "nick", "name").finalize().text,
            r#"ALTER TABLE "public"."test_user" RENAME COLUMN "nick" TO "name""#
        );
        assert_eq!(
            alter_nullability(&entity, "name", true).finalize().text,
            r#"ALTER TABLE "public"."test_user" ALTER COLUMN "name" DROP NOT NULL"#
        );
    }

    #[test]
    fn test_create_table_requires_fields() {
        let empty = Entity::builder("public", "empty").build().unwrap();
        assert!(create_table(&empty).is_err());
    }
}
