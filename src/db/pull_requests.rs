//! Database queries for pull requests and their reviewer links.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;

use super::{DbError, DbResultExt};
use crate::models::{PullRequest, PullRequestRow, PullRequestShort, PullRequestStatus, User};
use crate::store::PullRequestRepository;

pub struct SqlitePullRequestRepository;

#[async_trait]
impl PullRequestRepository<SqliteConnection> for SqlitePullRequestRepository {
    async fn exists(&self, conn: &mut SqliteConnection, id: &str) -> Result<bool, DbError> {
        let found = sqlx::query("SELECT 1 FROM pull_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("check pull request id")?
            .is_some();

        Ok(found)
    }

    async fn create(
        &self,
        conn: &mut SqliteConnection,
        pull_request: &PullRequest,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO pull_requests (id, name, author_id, status, created_at, merged_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pull_request.id)
        .bind(&pull_request.name)
        .bind(&pull_request.author_id)
        .bind(pull_request.status.as_str())
        .bind(pull_request.created_at)
        .bind(pull_request.merged_at)
        .execute(&mut *conn)
        .await
        .context("insert pull request")?;

        for (slot, reviewer) in pull_request.reviewers.iter().enumerate() {
            sqlx::query(
                "INSERT INTO pull_request_reviewers (pull_request_id, reviewer_id, slot) VALUES (?, ?, ?)",
            )
            .bind(&pull_request.id)
            .bind(&reviewer.id)
            .bind(slot as i64)
            .execute(&mut *conn)
            .await
            .context(format!("insert reviewer link for {}", reviewer.id))?;
        }

        Ok(())
    }

    async fn get_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<PullRequest>, DbError> {
        let row: Option<PullRequestRow> = sqlx::query_as(
            r#"
            SELECT id, name, author_id, status, created_at, merged_at
            FROM pull_requests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("get pull request")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let reviewers: Vec<User> = sqlx::query_as(
            r#"
            SELECT u.id, u.username, u.is_active, u.team_name
            FROM users u
            JOIN pull_request_reviewers r ON r.reviewer_id = u.id
            WHERE r.pull_request_id = ?
            ORDER BY r.slot
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .context("get reviewers")?;

        Ok(Some(row.with_reviewers(reviewers)))
    }

    async fn set_status(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: PullRequestStatus,
    ) -> Result<Option<i64>, DbError> {
        let query = match status {
            // COALESCE keeps the first merge time if the row is already merged.
            PullRequestStatus::Merged => {
                "UPDATE pull_requests SET status = ?, merged_at = COALESCE(merged_at, ?) WHERE id = ? RETURNING merged_at"
            }
            PullRequestStatus::Open => {
                "UPDATE pull_requests SET status = ?, merged_at = NULL WHERE id = ? RETURNING merged_at"
            }
        };

        let mut update = sqlx::query_scalar::<_, Option<i64>>(query).bind(status.as_str());
        if status == PullRequestStatus::Merged {
            update = update.bind(Utc::now().timestamp());
        }

        update
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .context(format!("set status {}", status))
    }

    async fn replace_reviewer(
        &self,
        conn: &mut SqliteConnection,
        pull_request_id: &str,
        old_id: &str,
        new_id: &str,
    ) -> Result<(), DbError> {
        let slot: i64 = sqlx::query_scalar(
            r#"
            DELETE FROM pull_request_reviewers
            WHERE pull_request_id = ? AND reviewer_id = ?
            RETURNING slot
            "#,
        )
        .bind(pull_request_id)
        .bind(old_id)
        .fetch_one(&mut *conn)
        .await
        .context(format!("remove reviewer link for {}", old_id))?;

        sqlx::query(
            "INSERT INTO pull_request_reviewers (pull_request_id, reviewer_id, slot) VALUES (?, ?, ?)",
        )
        .bind(pull_request_id)
        .bind(new_id)
        .bind(slot)
        .execute(&mut *conn)
        .await
        .context(format!("insert reviewer link for {}", new_id))?;

        Ok(())
    }

    async fn list_by_reviewer(
        &self,
        conn: &mut SqliteConnection,
        reviewer_id: &str,
    ) -> Result<Vec<PullRequestShort>, DbError> {
        sqlx::query_as::<_, PullRequestShort>(
            r#"
            SELECT pr.id, pr.name, pr.author_id, pr.status
            FROM pull_requests pr
            JOIN pull_request_reviewers r ON r.pull_request_id = pr.id
            WHERE r.reviewer_id = ?
            ORDER BY pr.created_at, pr.id
            "#,
        )
        .bind(reviewer_id)
        .fetch_all(&mut *conn)
        .await
        .context("get user reviews")
    }
}
