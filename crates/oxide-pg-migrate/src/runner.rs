//! Migration runner.
//!
//! A named migration runs in one transaction: the bookkeeping insert, every
//! statement of the plan in order, then the completion timestamp. Any
//! failure rolls the whole unit back.

use std::sync::Arc;

use oxide_pg_core::builder::comparator::{col, Compare};
use oxide_pg_core::builder::insert::InsertBuilder;
use oxide_pg_core::builder::select::Query;
use oxide_pg_core::builder::where_clause::WhereBuilder;
use oxide_pg_core::builder::OrderDirection;
use oxide_pg_core::entity::Entity;
use oxide_pg_core::error::SqlError;
use oxide_pg_core::executor::QueryExecutor;
use oxide_pg_core::migrations::{suggest_migrations, CatalogReader, SuggestedMigration};
use oxide_pg_core::sql;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::MigratorConfig;
use crate::database::Database;
use crate::error::{MigrateError, Result};
use crate::history::{history_entity, MigrationRecord};

/// SQLSTATE `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &SqlError) -> bool {
    match err {
        SqlError::QueryFailed { source, .. } => source
            .downcast_ref::<sqlx::Error>()
            .and_then(sqlx::Error::as_database_error)
            .and_then(|db| db.code())
            .is_some_and(|code| code == UNIQUE_VIOLATION),
        _ => false,
    }
}

async fn plan_with<E: QueryExecutor>(
    entity: &Entity,
    executor: &mut E,
) -> Result<Vec<SuggestedMigration>> {
    let mut reader = CatalogReader::new(executor)?;
    Ok(suggest_migrations(entity, &mut reader).await?)
}

async fn record_start<E: QueryExecutor>(
    history: &Arc<Entity>,
    name: &str,
    executor: &mut E,
) -> Result<()> {
    let insert = InsertBuilder::with_columns(history, &["name"])?
        .add_rows(&[json!({ "name": name })])?;
    match insert.execute(executor).await {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(MigrateError::DuplicateMigration {
            name: name.to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

async fn record_completion<E: QueryExecutor>(
    history: &Arc<Entity>,
    name: &str,
    executor: &mut E,
) -> Result<()> {
    let query = sql!(
        r#"UPDATE {} SET "completed_at" = now() WHERE "name" = {}"#,
        history,
        name
    )?
    .finalize();
    executor.execute(&query).await?;
    Ok(())
}

/// Plans and applies schema migrations, recording each one by name.
#[derive(Debug, Clone)]
pub struct Migrator {
    db: Database,
    config: MigratorConfig,
    history: Arc<Entity>,
}

impl Migrator {
    /// Creates a runner. Fails if the configured bookkeeping table name is
    /// not a valid identifier.
    pub fn new(db: Database, config: MigratorConfig) -> Result<Self> {
        let history = history_entity(&config.schema, &config.table)?;
        Ok(Self {
            db,
            config,
            history,
        })
    }

    /// Enables dry-run mode (statements are logged, nothing is executed).
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.config.dry_run = enabled;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Returns the database handle.
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the bookkeeping table declaration.
    #[must_use]
    pub const fn history_entity(&self) -> &Arc<Entity> {
        &self.history
    }

    /// Creates the bookkeeping table, or brings it up to date.
    pub async fn init(&self) -> Result<()> {
        if self.config.dry_run {
            return Ok(());
        }
        info!(
            schema = %self.config.schema,
            table = %self.config.table,
            "Ensuring migration history table"
        );
        let history = Arc::clone(&self.history);
        self.db
            .with_transaction(self.config.isolation, move |tx| {
                Box::pin(async move {
                    let plan = plan_with(&history, tx).await?;
                    for migration in &plan {
                        for query in &migration.queries {
                            tx.execute(query).await?;
                        }
                    }
                    Ok(())
                })
            })
            .await
    }

    /// Computes the plan that brings `entity` in line with the live catalog.
    pub async fn plan(&self, entity: &Entity) -> Result<Vec<SuggestedMigration>> {
        let mut client = self.db.acquire().await?;
        plan_with(entity, &mut client).await
    }

    /// Runs `plan` as the migration `name`.
    ///
    /// Fails with [`MigrateError::DuplicateMigration`] when `name` has
    /// already been recorded, in which case nothing is executed.
    pub async fn execute_migration(&self, name: &str, plan: &[SuggestedMigration]) -> Result<()> {
        info!(name, "Applying migration");

        if self.config.dry_run {
            for migration in plan {
                for query in &migration.queries {
                    info!(name, reason = migration.reason.as_str(), sql = %query, "Dry run");
                }
            }
            return Ok(());
        }

        self.init().await?;

        let statements: usize = plan.iter().map(|m| m.queries.len()).sum();
        let history = Arc::clone(&self.history);
        let owned_name = name.to_string();
        let plan = plan.to_vec();
        self.db
            .with_transaction(self.config.isolation, move |tx| {
                Box::pin(async move {
                    record_start(&history, &owned_name, tx).await?;
                    for migration in &plan {
                        debug!(reason = migration.reason.as_str(), "Applying suggestion");
                        for query in &migration.queries {
                            tx.execute(query).await?;
                        }
                    }
                    record_completion(&history, &owned_name, tx).await
                })
            })
            .await?;

        info!(name, statements, "Migration applied");
        Ok(())
    }

    /// Plans `entity` and runs the result as the migration `name`.
    ///
    /// Returns `false` when `name` had already been applied.
    pub async fn migrate(&self, name: &str, entity: &Entity) -> Result<bool> {
        let plan = self.plan(entity).await?;
        match self.execute_migration(name, &plan).await {
            Ok(()) => Ok(true),
            Err(MigrateError::DuplicateMigration { .. }) => {
                warn!(name, "Migration already applied, skipping");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Lists recorded migrations in start order.
    pub async fn history(&self) -> Result<Vec<MigrationRecord>> {
        let mut client = self.db.acquire().await?;
        let records = Query::from(&self.history)
            .add_order_by("started_at", OrderDirection::Asc)?
            .add_order_by("name", OrderDirection::Asc)?
            .get_many_as(&mut client, None)
            .await?;
        Ok(records)
    }

    /// Checks whether the migration `name` has been recorded.
    pub async fn is_applied(&self, name: &str) -> Result<bool> {
        let filter = WhereBuilder::new().open_where(col("name").equals(name))?;
        let mut client = self.db.acquire().await?;
        let row = Query::from(&self.history)
            .select(&["name"])?
            .add_where(&filter)?
            .get_one(&mut client)
            .await?;
        Ok(row.is_some())
    }
}
