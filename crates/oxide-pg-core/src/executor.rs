//! The seam between the builders and a database connection.

use std::future::Future;

use crate::error::Result;
use crate::prepared::FinalizedQuery;

/// A result row, keyed by column label.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Runs finalized queries.
///
/// Implementations acquire whatever connection they need for the duration of
/// one call and release it on every exit path. Driver failures are reported
/// as [`SqlError::QueryFailed`](crate::error::SqlError::QueryFailed).
pub trait QueryExecutor: Send {
    /// Runs `query` and returns every row it produced.
    fn fetch_all(&mut self, query: &FinalizedQuery) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Runs `query` and returns the number of affected rows.
    fn execute(&mut self, query: &FinalizedQuery) -> impl Future<Output = Result<u64>> + Send;
}
