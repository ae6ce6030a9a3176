#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use oxide_pg_core::prelude::*;
use oxide_pg_core::value::ColumnType;

pub fn test_user() -> Arc<Entity> {
    Entity::builder("public", "test_user")
        .column("id", SqlType::Uuid)
        .column("name", SqlType::Text)
        .column("meta", SqlType::Jsonb)
        .build()
        .unwrap_or_else(|e| panic!("invalid test_user entity: {e}"))
}

pub fn post() -> Arc<Entity> {
    Entity::builder("public", "post")
        .column("id", SqlType::Uuid)
        .column("author_id", SqlType::Uuid)
        .column("title", SqlType::Text)
        .field("tags", ColumnSpec::new(ColumnType::array_of(SqlType::Text)))
        .build()
        .unwrap_or_else(|e| panic!("invalid post entity: {e}"))
}

pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("Expected an object, got {other}"),
    }
}

/// Records every query and answers `fetch_all` from a queue of replies.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    pub sent: Vec<FinalizedQuery>,
    pub replies: VecDeque<Vec<Row>>,
    pub affected: u64,
}

impl RecordingExecutor {
    pub fn replying(replies: Vec<Vec<Row>>) -> Self {
        Self {
            replies: replies.into(),
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.sent.iter().map(|q| q.text.as_str()).collect()
    }
}

impl QueryExecutor for RecordingExecutor {
    async fn fetch_all(&mut self, query: &FinalizedQuery) -> Result<Vec<Row>> {
        self.sent.push(query.clone());
        Ok(self.replies.pop_front().unwrap_or_default())
    }

    async fn execute(&mut self, query: &FinalizedQuery) -> Result<u64> {
        self.sent.push(query.clone());
        Ok(self.affected)
    }
}
