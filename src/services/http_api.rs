//! REST API routes for the reviewer service.
//!
//! Handlers validate request shape, run exactly one engine workflow under a
//! per-request cancellation token and translate the outcome into JSON.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::SqliteStore;
use crate::error::{AppError, ConflictReason, Resource};
use crate::models::{PullRequest, PullRequestShort, Team, TeamMember, User};
use crate::services::ReviewEngine;

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<ReviewEngine<SqliteStore>>,
    /// Parent of every request token; cancelled on shutdown.
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
}

impl ApiState {
    pub fn new(
        engine: Arc<ReviewEngine<SqliteStore>>,
        shutdown: CancellationToken,
        request_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            shutdown,
            request_timeout,
        }
    }

    /// Token for one request. It fires on shutdown or once the request
    /// timeout elapses.
    fn request_scope(&self) -> RequestScope {
        let token = self.shutdown.child_token();
        let deadline = token.clone();
        let timeout = self.request_timeout;

        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    log::warn!("[http] Request exceeded {:?}, cancelling", timeout);
                    deadline.cancel();
                }
                _ = deadline.cancelled() => {}
            }
        });

        RequestScope { token, timer }
    }
}

struct RequestScope {
    token: CancellationToken,
    timer: JoinHandle<()>,
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

// ── Error handling ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Wrapper to make AppError usable as an axum error response.
pub struct ApiErr(AppError);

impl ApiErr {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::InvalidInput { .. } => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            AppError::AlreadyExists {
                resource: Resource::Team,
                ..
            } => (StatusCode::BAD_REQUEST, "TEAM_EXISTS"),
            AppError::AlreadyExists { .. } => (StatusCode::CONFLICT, "PR_EXISTS"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Conflict { reason } => (
                StatusCode::CONFLICT,
                match reason {
                    ConflictReason::PullRequestMerged => "PR_MERGED",
                    ConflictReason::NotAssigned => "NOT_ASSIGNED",
                    ConflictReason::NoCandidate => "NO_CANDIDATE",
                },
            ),
            AppError::Cancelled { .. } => (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED"),
            AppError::Database { .. } | AppError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            AppError::InvalidInput { message, .. } => message.clone(),
            AppError::AlreadyExists {
                resource: Resource::Team,
                ..
            } => "team_name already exists".to_string(),
            AppError::AlreadyExists { .. } => "PR id already exists".to_string(),
            AppError::NotFound { resource, .. } => format!("{} not found", describe(*resource)),
            AppError::Conflict { reason } => reason.message().to_string(),
            AppError::Cancelled { .. } => "request cancelled".to_string(),
            AppError::Database { .. } | AppError::Internal { .. } => "internal error".to_string(),
        }
    }
}

fn describe(resource: Resource) -> &'static str {
    match resource {
        Resource::PullRequest => "pull request",
        Resource::Author => "author or team",
        Resource::Team => "team",
        Resource::User => "user",
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            log::error!("[http] {}: {}", code, self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: ErrorDetail {
                    code,
                    message: self.message(),
                },
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiErr {
    fn from(rejection: JsonRejection) -> Self {
        Self(AppError::invalid_input(format!(
            "invalid input body: {}",
            rejection.body_text()
        )))
    }
}

impl From<QueryRejection> for ApiErr {
    fn from(rejection: QueryRejection) -> Self {
        Self(AppError::invalid_input(format!(
            "invalid query: {}",
            rejection.body_text()
        )))
    }
}

/// Unwrap a required, non-blank string field.
fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::invalid_input_field(
            format!("{} is required", field),
            field,
        )),
    }
}

fn required_flag(value: Option<bool>, field: &str) -> Result<bool, AppError> {
    value.ok_or_else(|| AppError::invalid_input_field(format!("{} is required", field), field))
}

fn rfc3339(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// ── Request types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AddTeamRequest {
    team_name: Option<String>,
    #[serde(default)]
    members: Vec<MemberRequest>,
}

#[derive(Deserialize)]
struct MemberRequest {
    user_id: Option<String>,
    username: Option<String>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
struct TeamQuery {
    team_name: Option<String>,
}

#[derive(Deserialize)]
struct SetIsActiveRequest {
    user_id: Option<String>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct CreatePullRequestRequest {
    pull_request_id: Option<String>,
    pull_request_name: Option<String>,
    author_id: Option<String>,
}

#[derive(Deserialize)]
struct MergePullRequestRequest {
    pull_request_id: Option<String>,
}

#[derive(Deserialize)]
struct ReassignRequest {
    pull_request_id: Option<String>,
    old_user_id: Option<String>,
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TeamResponse {
    team: Team,
}

#[derive(Serialize)]
struct UserResponse {
    user: User,
}

#[derive(Serialize)]
struct UserReviewsResponse {
    user_id: String,
    pull_requests: Vec<PullRequestShort>,
}

#[derive(Serialize)]
struct PullRequestBody {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: String,
    assigned_reviewers: Vec<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
    #[serde(rename = "mergedAt", skip_serializing_if = "Option::is_none")]
    merged_at: Option<String>,
}

impl From<&PullRequest> for PullRequestBody {
    fn from(pr: &PullRequest) -> Self {
        Self {
            pull_request_id: pr.id.clone(),
            pull_request_name: pr.name.clone(),
            author_id: pr.author_id.clone(),
            status: pr.status.as_str().to_string(),
            assigned_reviewers: pr.reviewer_ids(),
            created_at: rfc3339(pr.created_at),
            merged_at: pr.merged_at.and_then(rfc3339),
        }
    }
}

#[derive(Serialize)]
struct PullRequestResponse {
    pr: PullRequestBody,
}

#[derive(Serialize)]
struct ReassignResponse {
    pr: PullRequestBody,
    replaced_by: String,
}

#[derive(Serialize)]
struct PingResponse {
    status: &'static str,
    db: &'static str,
}

// ── Routes ───────────────────────────────────────────────────────────────────

pub fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_review))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .route("/ping", get(ping))
}

/// POST /team/add
async fn add_team(
    State(state): State<ApiState>,
    body: Result<Json<AddTeamRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TeamResponse>), ApiErr> {
    let Json(req) = body?;
    let team_name = required(req.team_name, "team_name")?;

    let members = req
        .members
        .into_iter()
        .map(|m| {
            Ok(TeamMember {
                user_id: required(m.user_id, "user_id")?,
                username: required(m.username, "username")?,
                is_active: required_flag(m.is_active, "is_active")?,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let scope = state.request_scope();
    let team = state
        .engine
        .create_team(&team_name, members, &scope.token)
        .await?;

    Ok((StatusCode::CREATED, Json(TeamResponse { team })))
}

/// GET /team/get?team_name=
async fn get_team(
    State(state): State<ApiState>,
    query: Result<Query<TeamQuery>, QueryRejection>,
) -> Result<Json<Team>, ApiErr> {
    let Query(query) = query?;
    let team_name = required(query.team_name, "team_name")?;

    let scope = state.request_scope();
    let team = state.engine.get_team(&team_name, &scope.token).await?;
    Ok(Json(team))
}

/// POST /users/setIsActive
async fn set_is_active(
    State(state): State<ApiState>,
    body: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiErr> {
    let Json(req) = body?;
    let user_id = required(req.user_id, "user_id")?;
    let is_active = required_flag(req.is_active, "is_active")?;

    let scope = state.request_scope();
    let user = state
        .engine
        .set_user_active(&user_id, is_active, &scope.token)
        .await?;
    Ok(Json(UserResponse { user }))
}

/// GET /users/getReview?user_id=
async fn get_review(
    State(state): State<ApiState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<UserReviewsResponse>, ApiErr> {
    let Query(query) = query?;
    let user_id = required(query.user_id, "user_id")?;

    let scope = state.request_scope();
    let pull_requests = state.engine.user_reviews(&user_id, &scope.token).await?;
    Ok(Json(UserReviewsResponse {
        user_id,
        pull_requests,
    }))
}

/// POST /pullRequest/create
async fn create_pull_request(
    State(state): State<ApiState>,
    body: Result<Json<CreatePullRequestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PullRequestResponse>), ApiErr> {
    let Json(req) = body?;
    let id = required(req.pull_request_id, "pull_request_id")?;
    let name = required(req.pull_request_name, "pull_request_name")?;
    let author_id = required(req.author_id, "author_id")?;

    let scope = state.request_scope();
    let pr = state
        .engine
        .create_pull_request(&id, &name, &author_id, &scope.token)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PullRequestResponse {
            pr: PullRequestBody::from(&pr),
        }),
    ))
}

/// POST /pullRequest/merge
async fn merge_pull_request(
    State(state): State<ApiState>,
    body: Result<Json<MergePullRequestRequest>, JsonRejection>,
) -> Result<Json<PullRequestResponse>, ApiErr> {
    let Json(req) = body?;
    let id = required(req.pull_request_id, "pull_request_id")?;

    let scope = state.request_scope();
    let pr = state.engine.merge_pull_request(&id, &scope.token).await?;

    Ok(Json(PullRequestResponse {
        pr: PullRequestBody::from(&pr),
    }))
}

/// POST /pullRequest/reassign
async fn reassign_reviewer(
    State(state): State<ApiState>,
    body: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<ReassignResponse>, ApiErr> {
    let Json(req) = body?;
    let pull_request_id = required(req.pull_request_id, "pull_request_id")?;
    let old_user_id = required(req.old_user_id, "old_user_id")?;

    let scope = state.request_scope();
    let reassignment = state
        .engine
        .reassign_reviewer(&pull_request_id, &old_user_id, &scope.token)
        .await?;

    Ok(Json(ReassignResponse {
        pr: PullRequestBody::from(&reassignment.pull_request),
        replaced_by: reassignment.replaced_by.id,
    }))
}

/// GET /ping
async fn ping(State(state): State<ApiState>) -> Result<Json<PingResponse>, ApiErr> {
    let scope = state.request_scope();
    state.engine.ping(&scope.token).await?;
    Ok(Json(PingResponse {
        status: "ok",
        db: "ok",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> (StatusCode, &'static str) {
        ApiErr(err).status_and_code()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(AppError::already_exists(Resource::Team, "backend")),
            (StatusCode::BAD_REQUEST, "TEAM_EXISTS")
        );
        assert_eq!(
            status_of(AppError::already_exists(Resource::PullRequest, "pr1")),
            (StatusCode::CONFLICT, "PR_EXISTS")
        );
        assert_eq!(
            status_of(AppError::conflict(ConflictReason::NoCandidate)),
            (StatusCode::CONFLICT, "NO_CANDIDATE")
        );
        assert_eq!(
            status_of(AppError::cancelled("merge pull request")),
            (StatusCode::SERVICE_UNAVAILABLE, "CANCELLED")
        );
        assert_eq!(
            status_of(AppError::database("disk I/O error")),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        );
    }

    #[test]
    fn test_existing_team_and_pull_request_messages() {
        assert_eq!(
            ApiErr(AppError::already_exists(Resource::Team, "PullRequest")).message(),
            "team_name already exists"
        );
        assert_eq!(
            ApiErr(AppError::already_exists(Resource::PullRequest, "Team")).message(),
            "PR id already exists"
        );
        assert_eq!(
            ApiErr(AppError::not_found_with_id(Resource::Author, "a")).message(),
            "author or team not found"
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ApiErr(AppError::database_with_op("disk I/O error", "merge"));
        assert_eq!(err.message(), "internal error");
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(Some("  ".to_string()), "user_id").is_err());
        assert!(required(None, "user_id").is_err());
        assert_eq!(required(Some("u1".to_string()), "user_id").unwrap(), "u1");
    }

    #[test]
    fn test_rfc3339_rendering() {
        assert_eq!(rfc3339(0).as_deref(), Some("1970-01-01T00:00:00Z"));
    }
}
