//! Database layer for SQLite storage.
//!
//! This module handles all database operations including:
//! - Connection pool management with WAL mode
//! - Schema migrations
//! - The SQLite implementation of the entity store contract

pub mod pool;
pub mod pull_requests;
pub mod store;
pub mod teams;
pub mod users;

pub use store::{SqliteStore, SqliteUnitOfWork};

use std::path::Path;
use thiserror::Error;

/// Database-related errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[source] sqlx::Error),

    /// A uniqueness constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A failure annotated with the step that produced it.
    #[error("{operation}: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("Migration error: {0}")]
    Migration(String),

    /// Failure raised on purpose by the in-memory store.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl DbError {
    /// Create an injected failure for the named operation.
    pub fn injected(operation: impl Into<String>) -> Self {
        Self::Injected(operation.into())
    }

    /// Wrap the error with the step that failed.
    pub fn context(self, operation: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with every context layer removed.
    pub fn root(&self) -> &DbError {
        let mut current = self;
        while let Self::Operation { source, .. } = current {
            current = source;
        }
        current
    }

    /// Message of the innermost error.
    pub fn root_message(&self) -> String {
        self.root().to_string()
    }

    /// All context layers joined outermost first, if any.
    pub fn operation(&self) -> Option<String> {
        let mut operations = Vec::new();
        let mut current = self;
        while let Self::Operation { operation, source } = current {
            operations.push(operation.as_str());
            current = source;
        }
        if operations.is_empty() {
            None
        } else {
            Some(operations.join(": "))
        }
    }

    /// Check whether a uniqueness constraint caused the failure.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self.root(), Self::UniqueViolation(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                Self::UniqueViolation(db_err.message().to_string())
            }
            _ => Self::Sqlite(err),
        }
    }
}

/// Attach step context to a fallible store call.
pub trait DbResultExt<T> {
    fn context(self, operation: impl Into<String>) -> Result<T, DbError>;
}

impl<T, E: Into<DbError>> DbResultExt<T> for Result<T, E> {
    fn context(self, operation: impl Into<String>) -> Result<T, DbError> {
        self.map_err(|e| e.into().context(operation))
    }
}

/// Initialize the database: create the file if needed and run migrations.
///
/// # Arguments
/// * `db_path` - Path to the SQLite database file
///
/// # Returns
/// A connection pool configured with WAL mode
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    initialize_with(db_path, &pool::PoolSettings::default()).await
}

/// Same as [`initialize`] with explicit pool settings.
pub async fn initialize_with(
    db_path: &Path,
    settings: &pool::PoolSettings,
) -> Result<pool::DbPool, DbError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Migration(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = pool::create_pool(db_path, settings).await?;

    run_migrations(&pool).await?;

    log::info!("[db] Database ready at {}", db_path.display());
    Ok(pool)
}

/// Embedded migrations, applied in order.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Run all pending database migrations.
async fn run_migrations(pool: &pool::DbPool) -> Result<(), DbError> {
    apply_migrations(pool, MIGRATIONS).await
}

/// Apply each migration not yet recorded in `_migrations`.
///
/// A migration script and its `_migrations` row commit together.
async fn apply_migrations(
    pool: &pool::DbPool,
    migrations: &[(&str, &str)],
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for &(name, migration_sql) in migrations {
        let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

        let applied: Option<(i64,)> = sqlx::query_as("SELECT id FROM _migrations WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        if applied.is_some() {
            continue;
        }

        log::info!("[db] Applying migration {}", name);

        sqlx::raw_sql(migration_sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| DbError::Migration(format!("{}: {}", name, e)))?;

        sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
            .bind(name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
    }

    Ok(())
}
