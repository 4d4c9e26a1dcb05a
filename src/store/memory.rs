//! In-memory implementation of the entity store.
//!
//! All state lives in a single `MemoryTables` value behind an async mutex.
//! A unit of work holds the lock for its whole lifetime and keeps a
//! snapshot taken at `begin`, so scopes are serialized and a rollback (or
//! a drop without commit) restores the snapshot. State is lost on restart.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{PullRequestRepository, Store, TeamRepository, UnitOfWork, UserRepository};
use crate::db::DbError;
use crate::models::{PullRequest, PullRequestShort, PullRequestStatus, Team, User};
use crate::services::{ReviewEngine, ReviewerSelector};

/// Stored pull request. Reviewers are kept as ids and resolved on read.
#[derive(Debug, Clone)]
struct StoredPullRequest {
    pull_request: PullRequest,
    reviewer_ids: Vec<String>,
}

/// Every table of the in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    teams: BTreeSet<String>,
    users: BTreeMap<String, User>,
    pull_requests: BTreeMap<String, StoredPullRequest>,
    /// Operations that fail with [`DbError::Injected`] when attempted.
    failing: HashSet<String>,
}

impl MemoryTables {
    fn check(&self, operation: &str) -> Result<(), DbError> {
        if self.failing.contains(operation) {
            return Err(DbError::injected(operation));
        }
        Ok(())
    }

    fn resolve(&self, stored: &StoredPullRequest) -> PullRequest {
        let mut pull_request = stored.pull_request.clone();
        pull_request.reviewers = stored
            .reviewer_ids
            .iter()
            .filter_map(|id| self.users.get(id).cloned())
            .collect();
        pull_request
    }
}

/// Names accepted by [`MemoryStore::fail_on`].
pub mod operations {
    pub const BEGIN: &str = "begin";
    pub const INSERT_TEAM: &str = "insert team";
    pub const UPSERT_USERS: &str = "upsert users";
    pub const GET_USER: &str = "get user";
    pub const ACTIVE_CANDIDATES: &str = "get active candidates";
    pub const INSERT_PULL_REQUEST: &str = "insert pull request";
    pub const INSERT_REVIEWER_LINK: &str = "insert reviewer link";
    pub const SET_STATUS: &str = "set status";
    pub const REPLACE_REVIEWER: &str = "replace reviewer";
    pub const COMMIT: &str = "commit";
}

/// In-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later attempt of `operation` fail.
    pub async fn fail_on(&self, operation: &str) {
        self.tables.lock().await.failing.insert(operation.to_string());
    }

    /// Stop failing `operation`.
    pub async fn heal(&self, operation: &str) {
        self.tables.lock().await.failing.remove(operation);
    }

    /// Number of stored pull requests.
    pub async fn pull_request_count(&self) -> usize {
        self.tables.lock().await.pull_requests.len()
    }

    /// Number of stored reviewer links across all pull requests.
    pub async fn reviewer_link_count(&self) -> usize {
        self.tables
            .lock()
            .await
            .pull_requests
            .values()
            .map(|stored| stored.reviewer_ids.len())
            .sum()
    }
}

/// Exclusive scope over the in-memory tables.
pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryTables>,
    snapshot: Option<MemoryTables>,
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    type Conn = MemoryTables;

    fn conn(&mut self) -> &mut MemoryTables {
        &mut self.guard
    }

    async fn commit(mut self) -> Result<(), DbError> {
        self.guard.check(operations::COMMIT)?;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        // Drop restores the snapshot.
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Conn = MemoryTables;
    type Tx = MemoryUnitOfWork;
    type Handle = OwnedMutexGuard<MemoryTables>;

    async fn begin(&self) -> Result<MemoryUnitOfWork, DbError> {
        let guard = self.tables.clone().lock_owned().await;
        guard.check(operations::BEGIN)?;
        let snapshot = Some(guard.clone());
        Ok(MemoryUnitOfWork { guard, snapshot })
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<MemoryTables>, DbError> {
        Ok(self.tables.clone().lock_owned().await)
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }
}

pub struct MemoryTeamRepository;

#[async_trait]
impl TeamRepository<MemoryTables> for MemoryTeamRepository {
    async fn create(&self, conn: &mut MemoryTables, name: &str) -> Result<(), DbError> {
        conn.check(operations::INSERT_TEAM)?;
        if !conn.teams.insert(name.to_string()) {
            return Err(DbError::UniqueViolation(format!("teams.name = {}", name)));
        }
        Ok(())
    }

    async fn get_by_name(
        &self,
        conn: &mut MemoryTables,
        name: &str,
    ) -> Result<Option<Team>, DbError> {
        if !conn.teams.contains(name) {
            return Ok(None);
        }
        let members: Vec<User> = conn
            .users
            .values()
            .filter(|u| u.team_name == name)
            .cloned()
            .collect();
        Ok(Some(Team::from_users(name, &members)))
    }
}

pub struct MemoryUserRepository;

#[async_trait]
impl UserRepository<MemoryTables> for MemoryUserRepository {
    async fn upsert(&self, conn: &mut MemoryTables, users: &[User]) -> Result<(), DbError> {
        conn.check(operations::UPSERT_USERS)?;
        for user in users {
            conn.users.insert(user.id.clone(), user.clone());
        }
        Ok(())
    }

    async fn get_by_id(
        &self,
        conn: &mut MemoryTables,
        user_id: &str,
    ) -> Result<Option<User>, DbError> {
        conn.check(operations::GET_USER)?;
        Ok(conn.users.get(user_id).cloned())
    }

    async fn active_candidates(
        &self,
        conn: &mut MemoryTables,
        team_name: &str,
        excluded_ids: &[String],
    ) -> Result<Vec<User>, DbError> {
        conn.check(operations::ACTIVE_CANDIDATES)?;
        Ok(conn
            .users
            .values()
            .filter(|u| u.is_active && u.team_name == team_name)
            .filter(|u| !excluded_ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn set_active(
        &self,
        conn: &mut MemoryTables,
        user_id: &str,
        is_active: bool,
    ) -> Result<Option<User>, DbError> {
        Ok(conn.users.get_mut(user_id).map(|user| {
            user.is_active = is_active;
            user.clone()
        }))
    }
}

pub struct MemoryPullRequestRepository;

#[async_trait]
impl PullRequestRepository<MemoryTables> for MemoryPullRequestRepository {
    async fn exists(&self, conn: &mut MemoryTables, id: &str) -> Result<bool, DbError> {
        Ok(conn.pull_requests.contains_key(id))
    }

    async fn create(
        &self,
        conn: &mut MemoryTables,
        pull_request: &PullRequest,
    ) -> Result<(), DbError> {
        conn.check(operations::INSERT_PULL_REQUEST)?;
        if conn.pull_requests.contains_key(&pull_request.id) {
            return Err(DbError::UniqueViolation(format!(
                "pull_requests.id = {}",
                pull_request.id
            )));
        }

        let mut stored = StoredPullRequest {
            pull_request: PullRequest {
                reviewers: Vec::new(),
                ..pull_request.clone()
            },
            reviewer_ids: Vec::new(),
        };
        conn.pull_requests
            .insert(pull_request.id.clone(), stored.clone());

        for reviewer in &pull_request.reviewers {
            conn.check(operations::INSERT_REVIEWER_LINK)
                .map_err(|e| e.context(format!("insert reviewer link for {}", reviewer.id)))?;
            stored.reviewer_ids.push(reviewer.id.clone());
            conn.pull_requests
                .insert(pull_request.id.clone(), stored.clone());
        }

        Ok(())
    }

    async fn get_by_id(
        &self,
        conn: &mut MemoryTables,
        id: &str,
    ) -> Result<Option<PullRequest>, DbError> {
        Ok(conn.pull_requests.get(id).map(|stored| conn.resolve(stored)))
    }

    async fn set_status(
        &self,
        conn: &mut MemoryTables,
        id: &str,
        status: PullRequestStatus,
    ) -> Result<Option<i64>, DbError> {
        conn.check(operations::SET_STATUS)?;
        let stored = conn
            .pull_requests
            .get_mut(id)
            .ok_or_else(|| DbError::Sqlite(sqlx::Error::RowNotFound).context("set status"))?;

        let pull_request = &mut stored.pull_request;
        pull_request.status = status;
        pull_request.merged_at = match status {
            PullRequestStatus::Merged => {
                Some(pull_request.merged_at.unwrap_or_else(|| Utc::now().timestamp()))
            }
            PullRequestStatus::Open => None,
        };
        Ok(pull_request.merged_at)
    }

    async fn replace_reviewer(
        &self,
        conn: &mut MemoryTables,
        pull_request_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<(), DbError> {
        conn.check(operations::REPLACE_REVIEWER)?;
        let stored = conn
            .pull_requests
            .get_mut(pull_request_id)
            .ok_or_else(|| DbError::Sqlite(sqlx::Error::RowNotFound).context("replace reviewer"))?;

        let slot = stored
            .reviewer_ids
            .iter_mut()
            .find(|id| id.as_str() == old_id)
            .ok_or_else(|| {
                DbError::Sqlite(sqlx::Error::RowNotFound)
                    .context(format!("remove reviewer link for {}", old_id))
            })?;
        *slot = new_id.to_string();
        Ok(())
    }

    async fn list_by_reviewer(
        &self,
        conn: &mut MemoryTables,
        reviewer_id: &str,
    ) -> Result<Vec<PullRequestShort>, DbError> {
        let mut matches: Vec<&PullRequest> = conn
            .pull_requests
            .values()
            .filter(|stored| stored.reviewer_ids.iter().any(|id| id == reviewer_id))
            .map(|stored| &stored.pull_request)
            .collect();
        matches.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(matches.into_iter().map(PullRequest::to_short).collect())
    }
}

impl ReviewEngine<MemoryStore> {
    /// Engine over a fresh in-memory store. The store handle is shared.
    pub fn in_memory(store: MemoryStore, selector: ReviewerSelector) -> Self {
        Self::new(
            store,
            Arc::new(MemoryTeamRepository),
            Arc::new(MemoryUserRepository),
            Arc::new(MemoryPullRequestRepository),
            selector,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, team: &str, active: bool) -> User {
        User {
            id: id.to_string(),
            username: id.to_uppercase(),
            is_active: active,
            team_name: team.to_string(),
        }
    }

    #[tokio::test]
    async fn test_dropped_unit_of_work_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            MemoryTeamRepository.create(tx.conn(), "backend").await.unwrap();
        }

        let mut conn = store.acquire().await.unwrap();
        let team = MemoryTeamRepository
            .get_by_name(&mut conn, "backend")
            .await
            .unwrap();
        assert!(team.is_none());
    }

    #[tokio::test]
    async fn test_commit_keeps_writes() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        MemoryTeamRepository.create(tx.conn(), "backend").await.unwrap();
        MemoryUserRepository
            .upsert(tx.conn(), &[user("a", "backend", true)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut conn = store.acquire().await.unwrap();
        let team = MemoryTeamRepository
            .get_by_name(&mut conn, "backend")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(team.members.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_team_is_unique_violation() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        MemoryTeamRepository.create(&mut conn, "backend").await.unwrap();
        let err = MemoryTeamRepository
            .create(&mut conn, "backend")
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_active_candidates_filters() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        MemoryUserRepository
            .upsert(
                &mut conn,
                &[
                    user("a", "backend", true),
                    user("b", "backend", true),
                    user("c", "backend", false),
                    user("d", "frontend", true),
                ],
            )
            .await
            .unwrap();

        let candidates = MemoryUserRepository
            .active_candidates(&mut conn, "backend", &["a".to_string()])
            .await
            .unwrap();
        let ids: Vec<&str> = candidates.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryStore::new();
        store.fail_on(operations::INSERT_TEAM).await;

        let mut conn = store.acquire().await.unwrap();
        let err = MemoryTeamRepository
            .create(&mut conn, "backend")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Injected(_)));
        drop(conn);

        store.heal(operations::INSERT_TEAM).await;
        let mut conn = store.acquire().await.unwrap();
        MemoryTeamRepository.create(&mut conn, "backend").await.unwrap();
    }
}
