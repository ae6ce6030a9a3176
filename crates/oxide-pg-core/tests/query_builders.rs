//! Integration tests for the query algebra and the builders.

mod common;

use common::{row, RecordingExecutor};
use oxide_pg_core::builder::comparator::ColumnComparator;
use oxide_pg_core::prelude::*;
use oxide_pg_core::value::WireValue;
use serde::Deserialize;
use serde_json::json;

// =============================================================================
// Finalization
// =============================================================================

#[test]
fn placeholders_number_from_one_in_template_order() {
    let inner = sql!("{} + {}", 1_i64, 2_i64).unwrap();
    let query = sql!(
        "SELECT {}, {}, {} FROM {} WHERE {}",
        "a",
        as_unescaped("now()"),
        inner,
        common::test_user(),
        true
    )
    .unwrap()
    .finalize();

    assert_eq!(
        query.text,
        concat!(
            r#"SELECT $1::text, now(), $2::double precision + $3::double precision"#,
            r#" FROM "public"."test_user" WHERE $4::boolean"#
        )
    );
    assert_eq!(
        query.values,
        vec![
            WireValue::Text("a".into()),
            WireValue::Int(1),
            WireValue::Int(2),
            WireValue::Bool(true),
        ]
    );
}

#[test]
fn template_arity_mismatch_is_rejected() {
    let err = sql!("{} = {}", 1_i64).unwrap_err();
    assert!(matches!(err, SqlError::TemplateArity { slots: 2, args: 1 }));
}

#[test]
fn empty_array_needs_an_explicit_type() {
    let err = sql!("{}", Vec::<i64>::new()).unwrap_err();
    assert!(matches!(err, SqlError::UnknownParameterType { .. }));

    let query = sql!("{}", as_casted_value(Vec::<i64>::new(), SqlType::Integer))
        .unwrap()
        .finalize();
    assert_eq!(query.text, "$1::integer[]");
}

// =============================================================================
// Where builder
// =============================================================================

#[test]
fn and_after_or_is_rejected_and_vice_versa() {
    let or = WhereBuilder::new()
        .or_where(col("name").equals("a"))
        .unwrap();
    assert!(matches!(
        or.and_where(col("name").equals("b")),
        Err(SqlError::MixedBoolExpr { .. })
    ));

    let and = WhereBuilder::new()
        .and_where(col("name").equals("a"))
        .unwrap();
    assert!(matches!(
        and.or_where(col("name").equals("b")),
        Err(SqlError::MixedBoolExpr { .. })
    ));
}

#[test]
fn composition_leaves_parts_untouched() {
    let user = common::test_user();
    let by_name = WhereBuilder::new()
        .open_where(col("name").equals("ann"))
        .unwrap();
    let by_id = WhereBuilder::new().open_where(col("id").is_null()).unwrap();
    let before = Query::from(&user).add_where(&by_name).unwrap();

    let both = WhereBuilder::either(&[by_name.clone(), by_id]);
    let combined = Query::from(&user)
        .add_where(&both)
        .unwrap()
        .get_query(None)
        .unwrap()
        .finalize();
    assert!(combined
        .text
        .ends_with(r#"WHERE ("name" = $1::text) OR ("id" IS NULL)"#));

    let after = Query::from(&user).add_where(&by_name).unwrap();
    assert_eq!(before, after);
}

#[test]
fn json_path_cast_goes_through_text() {
    let user = common::test_user();
    let path = WhereBuilder::new()
        .open_where(
            col("meta")
                .json_property("isCool")
                .cast_as(SqlType::Boolean)
                .equals(true),
        )
        .unwrap();
    let plain = WhereBuilder::new()
        .open_where(col("name").cast_as(SqlType::Boolean).equals(true))
        .unwrap();

    let text = |w: &WhereBuilder| {
        Query::from(&user)
            .select(&["id"])
            .unwrap()
            .add_where(w)
            .unwrap()
            .get_query(None)
            .unwrap()
            .finalize()
            .text
    };
    assert!(text(&path).ends_with(r#"WHERE ("meta"->'isCool')::text::boolean = $1::boolean"#));
    assert!(text(&plain).ends_with(r#"WHERE ("name")::boolean = $1::boolean"#));
}

// =============================================================================
// Insert
// =============================================================================

#[test]
fn insert_scenario() {
    let query = InsertBuilder::new(&common::test_user())
        .add_rows(&[json!({
            "id": "6f0dea07-3a5f-4e9d-9a3b-6d2a3c1f0b11",
            "name": "test",
            "meta": {"isCool": true}
        })])
        .unwrap()
        .get_query()
        .unwrap()
        .finalize();

    assert_eq!(
        query.text,
        r#"INSERT INTO "public"."test_user" ("id","name","meta") VALUES ($1::text,$2::text,$3::jsonb)"#
    );
    assert_eq!(
        serde_json::to_value(&query.values).unwrap(),
        json!(["6f0dea07-3a5f-4e9d-9a3b-6d2a3c1f0b11", "test", "{\"isCool\":true}"])
    );
}

#[derive(Debug, Deserialize, PartialEq)]
struct Created {
    id: String,
}

#[tokio::test]
async fn insert_with_returning_fetches_rows() {
    let mut executor =
        RecordingExecutor::replying(vec![vec![row(json!({"id": "6f0dea07"}))]]);
    let created: Vec<Created> = InsertBuilder::with_columns(&common::post(), &["id", "title"])
        .unwrap()
        .add_rows(&[json!({"id": "6f0dea07", "title": "hello", "ignored": 1})])
        .unwrap()
        .returning(&["id"])
        .unwrap()
        .execute_as(&mut executor)
        .await
        .unwrap();

    assert_eq!(created, vec![Created { id: "6f0dea07".into() }]);
    assert_eq!(
        executor.texts(),
        vec![r#"INSERT INTO "public"."post" ("id","title") VALUES ($1::text,$2::text) RETURNING "id""#]
    );
}

#[tokio::test]
async fn insert_without_returning_executes() {
    let mut executor = RecordingExecutor {
        affected: 2,
        ..RecordingExecutor::default()
    };
    let rows = InsertBuilder::new(&common::post())
        .add_rows(&[
            json!({"id": "a", "author_id": "u", "title": "one", "tags": ["x"]}),
            json!({"id": "b", "author_id": "u", "title": "two", "tags": []}),
        ])
        .unwrap()
        .execute(&mut executor)
        .await
        .unwrap();

    assert!(rows.is_empty());
    assert_eq!(executor.sent.len(), 1);
    assert_eq!(executor.sent[0].values.len(), 8);
}

// =============================================================================
// Select and join execution
// =============================================================================

#[tokio::test]
async fn get_one_limits_and_returns_first_row() {
    let mut executor = RecordingExecutor::replying(vec![vec![
        row(json!({"id": "1", "name": "ann"})),
        row(json!({"id": "2", "name": "bob"})),
    ]]);
    let first = Query::from(&common::test_user())
        .select(&["id", "name"])
        .unwrap()
        .get_one(&mut executor)
        .await
        .unwrap();

    assert_eq!(first, Some(row(json!({"id": "1", "name": "ann"}))));
    assert_eq!(
        executor.texts(),
        vec![r#"SELECT "id", "name" FROM "public"."test_user" LIMIT $1::double precision"#]
    );
    assert_eq!(executor.sent[0].values, vec![WireValue::Int(1)]);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Post {
    title: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct PostWithAuthor {
    u: Author,
    p: Option<Post>,
}

#[tokio::test]
async fn join_rows_are_folded_by_alias() {
    let on = WhereBuilder::new()
        .open_where(
            ColumnComparator::qualified("p", "author_id")
                .equals_column(&ColumnComparator::qualified("u", "id")),
        )
        .unwrap();
    let query = JoinQuery::from(&common::test_user(), "u")
        .unwrap()
        .left_join(&common::post(), "p", &on)
        .unwrap()
        .select("u", &["name"])
        .unwrap()
        .select("p", &["title"])
        .unwrap()
        .add_order_by("u", "name", OrderDirection::Asc)
        .unwrap();

    let mut executor = RecordingExecutor::replying(vec![vec![
        row(json!({"u_name": "ann", "p_title": "hello"})),
        row(json!({"u_name": "bob", "p_title": null})),
    ]]);
    let rows: Vec<PostWithAuthor> = query
        .get_many_as(&mut executor, Some(Page::new(0, 10)))
        .await
        .unwrap();

    assert_eq!(
        rows,
        vec![
            PostWithAuthor {
                u: Author { name: "ann".into() },
                p: Some(Post {
                    title: "hello".into()
                }),
            },
            PostWithAuthor {
                u: Author { name: "bob".into() },
                p: None,
            },
        ]
    );
    assert_eq!(
        executor.texts(),
        vec![concat!(
            r#"SELECT "u"."name" AS "u_name", "p"."title" AS "p_title""#,
            r#" FROM "public"."test_user" AS "u""#,
            r#" LEFT JOIN "public"."post" AS "p" ON "p"."author_id" = "u"."id""#,
            r#" ORDER BY "u"."name" ASC"#,
            " OFFSET $1::double precision LIMIT $2::double precision"
        )]
    );
}

#[test]
fn join_row_reconstruction() {
    let query = JoinQuery::from(&common::test_user(), "a")
        .unwrap()
        .inner_join(&common::post(), "b", &WhereBuilder::new())
        .unwrap()
        .select("a", &["name"])
        .unwrap()
        .select("b", &["title"])
        .unwrap();

    let folded = query
        .build_one(Some(&row(json!({"a_name": "v1", "b_title": "v2"}))))
        .unwrap();
    assert_eq!(folded, Some(json!({"a": {"name": "v1"}, "b": {"title": "v2"}})));
    assert_eq!(query.build_one(None).unwrap(), None);
}

#[test]
fn unknown_alias_names_the_known_ones() {
    let filter = WhereBuilder::new()
        .open_where(ColumnComparator::qualified("x", "name").is_null())
        .unwrap();
    let err = JoinQuery::from(&common::test_user(), "u")
        .unwrap()
        .add_where(&filter)
        .unwrap_err();
    assert_eq!(err.to_string(), "unknown alias 'x'; known aliases: [u]");
}
