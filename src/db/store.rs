//! SQLite-backed [`Store`].

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, Transaction};

use super::pool::DbPool;
use super::pull_requests::SqlitePullRequestRepository;
use super::teams::SqliteTeamRepository;
use super::users::SqliteUserRepository;
use super::DbError;
use crate::services::{ReviewEngine, ReviewerSelector};
use crate::store::{Store, UnitOfWork};

/// Store over a SQLite connection pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// A SQLite transaction. sqlx rolls it back if it is dropped uncommitted.
pub struct SqliteUnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl UnitOfWork for SqliteUnitOfWork {
    type Conn = SqliteConnection;

    fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    type Conn = SqliteConnection;
    type Tx = SqliteUnitOfWork;
    type Handle = PoolConnection<Sqlite>;

    /// Opens an immediate transaction: the write lock is taken before the
    /// scope reads anything, so concurrent writers queue on `busy_timeout`
    /// instead of failing with a stale snapshot.
    async fn begin(&self) -> Result<SqliteUnitOfWork, DbError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(SqliteUnitOfWork { tx })
    }

    async fn acquire(&self) -> Result<PoolConnection<Sqlite>, DbError> {
        Ok(self.pool.acquire().await?)
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

impl ReviewEngine<SqliteStore> {
    /// Engine wired to the SQLite repositories.
    pub fn with_sqlite(pool: DbPool, selector: ReviewerSelector) -> Self {
        Self::new(
            SqliteStore::new(pool),
            Arc::new(SqliteTeamRepository),
            Arc::new(SqliteUserRepository),
            Arc::new(SqlitePullRequestRepository),
            selector,
        )
    }
}
