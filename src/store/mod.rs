//! Entity store contract consumed by the review engine.
//!
//! Storage is split into three narrow repositories (teams, users, pull
//! requests). Every repository call takes an explicit connection handle,
//! which is either the connection inside a [`UnitOfWork`] or a plain
//! pooled handle for reads that need no atomic scope. Implementations can
//! be swapped (SQLite, in-memory) without touching the engine.

pub mod memory;

pub use memory::{MemoryStore, MemoryTables};

use std::ops::DerefMut;

use async_trait::async_trait;

use crate::db::DbError;
use crate::models::{PullRequest, PullRequestShort, PullRequestStatus, Team, User};

/// An atomic scope. Writes made through [`UnitOfWork::conn`] become visible
/// on [`UnitOfWork::commit`] and are discarded on [`UnitOfWork::rollback`].
///
/// Dropping a unit of work without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    type Conn: Send;

    /// Connection every operation inside this scope runs against.
    fn conn(&mut self) -> &mut Self::Conn;

    async fn commit(self) -> Result<(), DbError>;

    async fn rollback(self) -> Result<(), DbError>;
}

/// Source of connections and atomic scopes.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Conn: Send + 'static;
    type Tx: UnitOfWork<Conn = Self::Conn> + 'static;
    type Handle: DerefMut<Target = Self::Conn> + Send + 'static;

    /// Open a new atomic scope.
    async fn begin(&self) -> Result<Self::Tx, DbError>;

    /// Borrow a connection for reads outside any scope.
    async fn acquire(&self) -> Result<Self::Handle, DbError>;

    /// Round-trip to the backing store.
    async fn ping(&self) -> Result<(), DbError>;
}

#[async_trait]
pub trait TeamRepository<C: Send>: Send + Sync {
    /// Insert a team. A taken name is reported as a unique violation.
    async fn create(&self, conn: &mut C, name: &str) -> Result<(), DbError>;

    /// Fetch a team with its full roster.
    async fn get_by_name(&self, conn: &mut C, name: &str) -> Result<Option<Team>, DbError>;
}

#[async_trait]
pub trait UserRepository<C: Send>: Send + Sync {
    /// Insert or replace users by id.
    async fn upsert(&self, conn: &mut C, users: &[User]) -> Result<(), DbError>;

    async fn get_by_id(&self, conn: &mut C, user_id: &str) -> Result<Option<User>, DbError>;

    /// Active members of `team_name`, minus `excluded_ids`.
    async fn active_candidates(
        &self,
        conn: &mut C,
        team_name: &str,
        excluded_ids: &[String],
    ) -> Result<Vec<User>, DbError>;

    /// Set the active flag, returning the updated user if it exists.
    async fn set_active(
        &self,
        conn: &mut C,
        user_id: &str,
        is_active: bool,
    ) -> Result<Option<User>, DbError>;
}

#[async_trait]
pub trait PullRequestRepository<C: Send>: Send + Sync {
    async fn exists(&self, conn: &mut C, id: &str) -> Result<bool, DbError>;

    /// Insert the pull request and one reviewer link per assigned reviewer.
    /// A taken id is reported as a unique violation.
    async fn create(&self, conn: &mut C, pull_request: &PullRequest) -> Result<(), DbError>;

    /// Fetch a pull request with its reviewers resolved, in slot order.
    async fn get_by_id(&self, conn: &mut C, id: &str) -> Result<Option<PullRequest>, DbError>;

    /// Update the status. Moving to `MERGED` stamps the merge time once;
    /// returns the merge timestamp now stored for the pull request.
    async fn set_status(
        &self,
        conn: &mut C,
        id: &str,
        status: PullRequestStatus,
    ) -> Result<Option<i64>, DbError>;

    /// Remove the `old_id` reviewer link and insert `new_id` in its slot.
    async fn replace_reviewer(
        &self,
        conn: &mut C,
        pull_request_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<(), DbError>;

    /// Pull requests `reviewer_id` currently reviews.
    async fn list_by_reviewer(
        &self,
        conn: &mut C,
        reviewer_id: &str,
    ) -> Result<Vec<PullRequestShort>, DbError>;
}
