//! Pooled PostgreSQL access.
//!
//! [`Database`] hands out connections and transactions for the duration of
//! one unit of work. All three handles implement
//! [`QueryExecutor`](oxide_pg_core::executor::QueryExecutor), so the
//! builders and the catalog reader run against any of them.

use futures::future::BoxFuture;
use oxide_pg_core::error::{Result as SqlResult, SqlError};
use oxide_pg_core::executor::{QueryExecutor, Row};
use oxide_pg_core::prepared::FinalizedQuery;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::{debug, warn};

use crate::codec::{bind_query, decode_row};
use crate::config::{DatabaseConfig, IsolationLevel};
use crate::error::Result;

async fn fetch_rows<'e, X>(executor: X, query: &FinalizedQuery) -> SqlResult<Vec<Row>>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    debug!(sql = %query.text, "Executing SQL");
    let rows = bind_query(query)?
        .fetch_all(executor)
        .await
        .map_err(|e| SqlError::query_failed(query, e))?;
    rows.iter()
        .map(|row| decode_row(row).map_err(|e| SqlError::query_failed(query, e)))
        .collect()
}

async fn execute_query<'e, X>(executor: X, query: &FinalizedQuery) -> SqlResult<u64>
where
    X: sqlx::Executor<'e, Database = Postgres>,
{
    debug!(sql = %query.text, "Executing SQL");
    let done = bind_query(query)?
        .execute(executor)
        .await
        .map_err(|e| SqlError::query_failed(query, e))?;
    Ok(done.rows_affected())
}

/// A PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Opens a pool with the given settings.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Checks out one connection. It returns to the pool when dropped.
    pub async fn acquire(&self) -> Result<Client> {
        Ok(Client {
            conn: self.pool.acquire().await?,
        })
    }

    /// Starts a transaction at the given isolation level.
    ///
    /// Dropping the returned handle without committing rolls back.
    pub async fn begin(&self, isolation: IsolationLevel) -> Result<Transaction> {
        let mut tx = self.pool.begin().await?;
        let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(Transaction { tx })
    }

    /// Runs `f` with a checked-out connection and releases it afterwards.
    ///
    /// ```no_run
    /// # async fn demo(db: oxide_pg_migrate::database::Database) -> oxide_pg_migrate::error::Result<()> {
    /// use oxide_pg_core::prelude::*;
    ///
    /// let one = db
    ///     .with_client(|client| {
    ///         Box::pin(async move { Ok(client.fetch_all(&sql!("SELECT 1 AS one")?.finalize()).await?) })
    ///     })
    ///     .await?;
    /// assert_eq!(one.len(), 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_client<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Client) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut client = self.acquire().await?;
        f(&mut client).await
    }

    /// Runs `f` inside one transaction.
    ///
    /// Commits when `f` succeeds. Otherwise rolls back and returns the error
    /// of `f` unchanged.
    pub async fn with_transaction<T, F>(&self, isolation: IsolationLevel, f: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Transaction) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut tx = self.begin(isolation).await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl QueryExecutor for Database {
    async fn fetch_all(&mut self, query: &FinalizedQuery) -> SqlResult<Vec<Row>> {
        fetch_rows(&self.pool, query).await
    }

    async fn execute(&mut self, query: &FinalizedQuery) -> SqlResult<u64> {
        execute_query(&self.pool, query).await
    }
}

/// A connection checked out of a [`Database`].
pub struct Client {
    conn: PoolConnection<Postgres>,
}

impl QueryExecutor for Client {
    async fn fetch_all(&mut self, query: &FinalizedQuery) -> SqlResult<Vec<Row>> {
        fetch_rows(&mut *self.conn, query).await
    }

    async fn execute(&mut self, query: &FinalizedQuery) -> SqlResult<u64> {
        execute_query(&mut *self.conn, query).await
    }
}

/// An open transaction.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl Transaction {
    /// Commits the transaction.
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// Rolls the transaction back.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl QueryExecutor for Transaction {
    async fn fetch_all(&mut self, query: &FinalizedQuery) -> SqlResult<Vec<Row>> {
        fetch_rows(&mut *self.tx, query).await
    }

    async fn execute(&mut self, query: &FinalizedQuery) -> SqlResult<u64> {
        execute_query(&mut *self.tx, query).await
    }
}
