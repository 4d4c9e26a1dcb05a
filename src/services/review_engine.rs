//! Reviewer assignment engine.
//!
//! Every mutating workflow runs inside a single unit of work obtained from
//! the [`Store`]: it commits only when the whole workflow succeeded and rolls
//! back on every other exit, including cancellation. Each store call races
//! against the caller's cancellation token.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::reviewer_selection::ReviewerSelector;
use crate::db::DbError;
use crate::error::{AppError, ConflictReason, Resource};
use crate::models::{PullRequest, PullRequestShort, PullRequestStatus, Team, TeamMember, User};
use crate::store::{PullRequestRepository, Store, TeamRepository, UnitOfWork, UserRepository};

/// Outcome of a successful reassignment.
#[derive(Debug, Clone)]
pub struct Reassignment {
    /// The pull request with the replacement already in place.
    pub pull_request: PullRequest,
    /// The newly assigned reviewer.
    pub replaced_by: User,
}

pub struct ReviewEngine<S: Store> {
    store: S,
    teams: Arc<dyn TeamRepository<S::Conn>>,
    users: Arc<dyn UserRepository<S::Conn>>,
    pull_requests: Arc<dyn PullRequestRepository<S::Conn>>,
    selector: ReviewerSelector,
}

/// Run one store call, giving up as soon as `cancel` fires.
async fn step_with<T, F, M>(
    cancel: &CancellationToken,
    workflow: &str,
    fut: F,
    translate: M,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, DbError>>,
    M: FnOnce(DbError) -> AppError,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::cancelled(workflow)),
        result = fut => result.map_err(translate),
    }
}

async fn step<T, F>(cancel: &CancellationToken, workflow: &str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, DbError>>,
{
    step_with(cancel, workflow, fut, |e| AppError::from(e.context(workflow))).await
}

/// Map a uniqueness failure to `AlreadyExists`, anything else to a
/// database error annotated with the workflow.
fn unique_as_exists<'a>(
    workflow: &'a str,
    resource: Resource,
    id: &'a str,
) -> impl FnOnce(DbError) -> AppError + 'a {
    move |err| {
        if err.is_unique_violation() {
            AppError::already_exists(resource, id)
        } else {
            AppError::from(err.context(workflow))
        }
    }
}

impl<S: Store> ReviewEngine<S> {
    pub fn new(
        store: S,
        teams: Arc<dyn TeamRepository<S::Conn>>,
        users: Arc<dyn UserRepository<S::Conn>>,
        pull_requests: Arc<dyn PullRequestRepository<S::Conn>>,
        selector: ReviewerSelector,
    ) -> Self {
        Self {
            store,
            teams,
            users,
            pull_requests,
            selector,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Commit on success, roll back otherwise.
    async fn finish<T>(
        &self,
        tx: S::Tx,
        outcome: Result<T, AppError>,
        cancel: &CancellationToken,
        workflow: &str,
    ) -> Result<T, AppError> {
        let outcome = match outcome {
            Ok(_) if cancel.is_cancelled() => Err(AppError::cancelled(workflow)),
            other => other,
        };

        match outcome {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| AppError::from(e.context(format!("{}: commit", workflow))))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::warn!("[review] Rollback of {} failed: {}", workflow, rollback_err);
                }
                log::debug!("[review] {} rolled back: {}", workflow, err);
                Err(err)
            }
        }
    }

    /// Create a pull request and assign up to two active reviewers from the
    /// author's team.
    pub async fn create_pull_request(
        &self,
        id: &str,
        name: &str,
        author_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        const WORKFLOW: &str = "create pull request";

        let mut tx = step(cancel, WORKFLOW, self.store.begin()).await?;
        let outcome = self
            .create_in_scope(tx.conn(), id, name, author_id, cancel)
            .await;
        let pull_request = self.finish(tx, outcome, cancel, WORKFLOW).await?;

        log::info!(
            "[review] Created pull request {} by {} with reviewers {:?}",
            pull_request.id,
            pull_request.author_id,
            pull_request.reviewer_ids()
        );
        Ok(pull_request)
    }

    async fn create_in_scope(
        &self,
        conn: &mut S::Conn,
        id: &str,
        name: &str,
        author_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        const WORKFLOW: &str = "create pull request";

        if step(cancel, WORKFLOW, self.pull_requests.exists(conn, id)).await? {
            return Err(AppError::already_exists(Resource::PullRequest, id));
        }

        let author = step(cancel, WORKFLOW, self.users.get_by_id(conn, author_id))
            .await?
            .ok_or_else(|| AppError::not_found_with_id(Resource::Author, author_id))?;

        let team = step(cancel, WORKFLOW, self.teams.get_by_name(conn, &author.team_name))
            .await?
            .ok_or_else(|| AppError::not_found_with_id(Resource::Team, &author.team_name))?;

        let excluded = [author.id.clone()];
        let candidates = step(
            cancel,
            WORKFLOW,
            self.users.active_candidates(conn, &team.name, &excluded),
        )
        .await?;

        let pull_request = PullRequest {
            id: id.to_string(),
            name: name.to_string(),
            author_id: author.id,
            status: PullRequestStatus::Open,
            created_at: Utc::now().timestamp(),
            merged_at: None,
            reviewers: self.selector.select(candidates, PullRequest::MAX_REVIEWERS),
        };

        step_with(
            cancel,
            WORKFLOW,
            self.pull_requests.create(conn, &pull_request),
            unique_as_exists(WORKFLOW, Resource::PullRequest, id),
        )
        .await?;

        Ok(pull_request)
    }

    /// Mark a pull request as merged. Merging twice is a no-op.
    pub async fn merge_pull_request(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        const WORKFLOW: &str = "merge pull request";

        let mut tx = step(cancel, WORKFLOW, self.store.begin()).await?;
        let outcome = self.merge_in_scope(tx.conn(), id, cancel).await;
        self.finish(tx, outcome, cancel, WORKFLOW).await
    }

    async fn merge_in_scope(
        &self,
        conn: &mut S::Conn,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<PullRequest, AppError> {
        const WORKFLOW: &str = "merge pull request";

        let mut pull_request = step(cancel, WORKFLOW, self.pull_requests.get_by_id(conn, id))
            .await?
            .ok_or_else(|| AppError::not_found_with_id(Resource::PullRequest, id))?;

        if pull_request.is_merged() {
            log::debug!("[review] Pull request {} already merged", id);
            return Ok(pull_request);
        }

        let merged_at = step(
            cancel,
            WORKFLOW,
            self.pull_requests
                .set_status(conn, id, PullRequestStatus::Merged),
        )
        .await?;

        pull_request.status = PullRequestStatus::Merged;
        pull_request.merged_at = merged_at;

        log::info!("[review] Merged pull request {}", id);
        Ok(pull_request)
    }

    /// Replace `old_user_id` on a pull request with a random active member
    /// of the same team who is not already involved.
    pub async fn reassign_reviewer(
        &self,
        pull_request_id: &str,
        old_user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Reassignment, AppError> {
        const WORKFLOW: &str = "reassign reviewer";

        let mut tx = step(cancel, WORKFLOW, self.store.begin()).await?;
        let outcome = self
            .reassign_in_scope(tx.conn(), pull_request_id, old_user_id, cancel)
            .await;
        let reassignment = self.finish(tx, outcome, cancel, WORKFLOW).await?;

        log::info!(
            "[review] Reassigned {} on {} to {}",
            old_user_id,
            pull_request_id,
            reassignment.replaced_by.id
        );
        Ok(reassignment)
    }

    async fn reassign_in_scope(
        &self,
        conn: &mut S::Conn,
        pull_request_id: &str,
        old_user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Reassignment, AppError> {
        const WORKFLOW: &str = "reassign reviewer";

        let mut pull_request = step(
            cancel,
            WORKFLOW,
            self.pull_requests.get_by_id(conn, pull_request_id),
        )
        .await?
        .ok_or_else(|| AppError::not_found_with_id(Resource::PullRequest, pull_request_id))?;

        if pull_request.is_merged() {
            return Err(AppError::conflict(ConflictReason::PullRequestMerged));
        }

        if !pull_request.has_reviewer(old_user_id) {
            return Err(AppError::conflict(ConflictReason::NotAssigned));
        }

        let old_reviewer = step(cancel, WORKFLOW, self.users.get_by_id(conn, old_user_id))
            .await?
            .ok_or_else(|| AppError::not_found_with_id(Resource::User, old_user_id))?;

        let excluded = pull_request.participant_ids();
        let candidates = step(
            cancel,
            WORKFLOW,
            self.users
                .active_candidates(conn, &old_reviewer.team_name, &excluded),
        )
        .await?;

        let replacement = self
            .selector
            .select_one(candidates)
            .ok_or_else(|| AppError::conflict(ConflictReason::NoCandidate))?;

        step(
            cancel,
            WORKFLOW,
            self.pull_requests
                .replace_reviewer(conn, pull_request_id, old_user_id, &replacement.id),
        )
        .await?;

        pull_request.replace_reviewer(old_user_id, replacement.clone());

        Ok(Reassignment {
            pull_request,
            replaced_by: replacement,
        })
    }

    /// Pull requests `user_id` currently reviews. Runs outside any unit of
    /// work.
    pub async fn user_reviews(
        &self,
        user_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PullRequestShort>, AppError> {
        const WORKFLOW: &str = "get user reviews";

        let mut handle = step(cancel, WORKFLOW, self.store.acquire()).await?;
        step(
            cancel,
            WORKFLOW,
            self.pull_requests.list_by_reviewer(&mut *handle, user_id),
        )
        .await
    }

    /// Register a team and upsert its members.
    pub async fn create_team(
        &self,
        team_name: &str,
        members: Vec<TeamMember>,
        cancel: &CancellationToken,
    ) -> Result<Team, AppError> {
        const WORKFLOW: &str = "create team";

        let users: Vec<User> = members
            .into_iter()
            .map(|member| member.into_user(team_name))
            .collect();

        let mut tx = step(cancel, WORKFLOW, self.store.begin()).await?;
        let outcome = self.create_team_in_scope(tx.conn(), team_name, &users, cancel).await;
        self.finish(tx, outcome, cancel, WORKFLOW).await?;

        log::info!(
            "[review] Created team {} with {} member(s)",
            team_name,
            users.len()
        );
        Ok(Team::from_users(team_name, &users))
    }

    async fn create_team_in_scope(
        &self,
        conn: &mut S::Conn,
        team_name: &str,
        users: &[User],
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        const WORKFLOW: &str = "create team";

        step_with(
            cancel,
            WORKFLOW,
            self.teams.create(conn, team_name),
            unique_as_exists(WORKFLOW, Resource::Team, team_name),
        )
        .await?;

        step(cancel, WORKFLOW, self.users.upsert(conn, users)).await
    }

    pub async fn get_team(
        &self,
        team_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Team, AppError> {
        const WORKFLOW: &str = "get team";

        let mut handle = step(cancel, WORKFLOW, self.store.acquire()).await?;
        step(cancel, WORKFLOW, self.teams.get_by_name(&mut *handle, team_name))
            .await?
            .ok_or_else(|| AppError::not_found_with_id(Resource::Team, team_name))
    }

    pub async fn set_user_active(
        &self,
        user_id: &str,
        is_active: bool,
        cancel: &CancellationToken,
    ) -> Result<User, AppError> {
        const WORKFLOW: &str = "set user active";

        let mut tx = step(cancel, WORKFLOW, self.store.begin()).await?;
        let outcome = step(
            cancel,
            WORKFLOW,
            self.users.set_active(tx.conn(), user_id, is_active),
        )
        .await
        .and_then(|user| user.ok_or_else(|| AppError::not_found_with_id(Resource::User, user_id)));
        let user = self.finish(tx, outcome, cancel, WORKFLOW).await?;

        log::info!("[review] User {} is_active = {}", user.id, user.is_active);
        Ok(user)
    }

    /// Round-trip to the store.
    pub async fn ping(&self, cancel: &CancellationToken) -> Result<(), AppError> {
        step(cancel, "ping", self.store.ping()).await
    }
}
