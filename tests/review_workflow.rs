//! End-to-end review workflow tests against a real SQLite database.
//!
//! Walks through team registration, pull request creation, merge,
//! reassignment and review listing, checking both the returned values and
//! the rows left behind.

use std::collections::HashSet;
use std::sync::Arc;

use pr_reviewer_lib::db::pool::DbPool;
use pr_reviewer_lib::db::pull_requests::SqlitePullRequestRepository;
use pr_reviewer_lib::db::{self, SqliteStore};
use pr_reviewer_lib::error::{AppError, ConflictReason, ErrorKind};
use pr_reviewer_lib::models::{PullRequest, PullRequestStatus, TeamMember};
use pr_reviewer_lib::services::{ReviewEngine, ReviewerSelector};
use pr_reviewer_lib::store::{PullRequestRepository, Store, UnitOfWork};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

struct Fixture {
    _dir: TempDir,
    pool: DbPool,
    engine: ReviewEngine<SqliteStore>,
}

async fn setup() -> Fixture {
    let dir = tempdir().unwrap();
    let pool = db::initialize(&dir.path().join("reviews.db")).await.unwrap();
    let engine = ReviewEngine::with_sqlite(pool.clone(), ReviewerSelector::seeded(2024));
    Fixture {
        _dir: dir,
        pool,
        engine,
    }
}

fn member(id: &str, active: bool) -> TeamMember {
    TeamMember {
        user_id: id.to_string(),
        username: format!("User {}", id.to_uppercase()),
        is_active: active,
    }
}

async fn count(pool: &DbPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

fn reviewer_set(pr: &PullRequest) -> HashSet<String> {
    pr.reviewer_ids().into_iter().collect()
}

#[tokio::test]
async fn test_full_review_lifecycle() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    f.engine
        .create_team(
            "backend",
            vec![member("a", true), member("b", true), member("c", true)],
            &cancel,
        )
        .await
        .unwrap();

    // Both teammates are picked; the author never is.
    let pr = f
        .engine
        .create_pull_request("pr1", "feat", "a", &cancel)
        .await
        .unwrap();
    assert_eq!(pr.status, PullRequestStatus::Open);
    assert_eq!(
        reviewer_set(&pr),
        HashSet::from(["b".to_string(), "c".to_string()])
    );
    assert_eq!(count(&f.pool, "pull_request_reviewers").await, 2);

    // Reload matches what was returned, in the same reviewer order.
    let mut conn = f.engine.store().acquire().await.unwrap();
    let stored = SqlitePullRequestRepository
        .get_by_id(&mut *conn, "pr1")
        .await
        .unwrap()
        .unwrap();
    drop(conn);
    assert_eq!(stored.reviewer_ids(), pr.reviewer_ids());

    for reviewer in ["b", "c"] {
        let reviews = f.engine.user_reviews(reviewer, &cancel).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].id, "pr1");
        assert_eq!(reviews[0].status, PullRequestStatus::Open);
    }

    let merged = f.engine.merge_pull_request("pr1", &cancel).await.unwrap();
    assert_eq!(merged.status, PullRequestStatus::Merged);
    assert!(merged.merged_at.is_some());
    assert_eq!(merged.reviewer_ids(), pr.reviewer_ids());

    let again = f.engine.merge_pull_request("pr1", &cancel).await.unwrap();
    assert_eq!(again.merged_at, merged.merged_at);

    let (status, merged_at): (String, Option<i64>) =
        sqlx::query_as("SELECT status, merged_at FROM pull_requests WHERE id = 'pr1'")
            .fetch_one(&f.pool)
            .await
            .unwrap();
    assert_eq!(status, "MERGED");
    assert_eq!(merged_at, merged.merged_at);

    let err = f
        .engine
        .reassign_reviewer("pr1", "b", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::PullRequestMerged));
}

#[tokio::test]
async fn test_reassign_after_reactivation() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    f.engine
        .create_team(
            "backend",
            vec![member("a", true), member("b", true), member("c", false)],
            &cancel,
        )
        .await
        .unwrap();

    let pr = f
        .engine
        .create_pull_request("pr1", "feat", "a", &cancel)
        .await
        .unwrap();
    assert_eq!(pr.reviewer_ids(), vec!["b".to_string()]);

    // c is inactive and a is the author: nobody can take over.
    let err = f
        .engine
        .reassign_reviewer("pr1", "b", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.conflict_reason(), Some(ConflictReason::NoCandidate));
    assert_eq!(f.engine.user_reviews("b", &cancel).await.unwrap().len(), 1);

    let user = f.engine.set_user_active("c", true, &cancel).await.unwrap();
    assert!(user.is_active);
    assert_eq!(user.team_name, "backend");

    let reassignment = f
        .engine
        .reassign_reviewer("pr1", "b", &cancel)
        .await
        .unwrap();
    assert_eq!(reassignment.replaced_by.id, "c");
    assert_eq!(
        reassignment.pull_request.reviewer_ids(),
        vec!["c".to_string()]
    );

    assert!(f.engine.user_reviews("b", &cancel).await.unwrap().is_empty());
    let reviews = f.engine.user_reviews("c", &cancel).await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].id, "pr1");

    // The old reviewer is eligible again for later pull requests.
    f.engine.set_user_active("c", false, &cancel).await.unwrap();
    let next = f
        .engine
        .create_pull_request("pr2", "fix", "a", &cancel)
        .await
        .unwrap();
    assert_eq!(next.reviewer_ids(), vec!["b".to_string()]);
}

#[tokio::test]
async fn test_reassign_preserves_slot_order() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    f.engine
        .create_team(
            "backend",
            vec![
                member("a", true),
                member("b", true),
                member("c", true),
                member("d", true),
            ],
            &cancel,
        )
        .await
        .unwrap();

    let pr = f
        .engine
        .create_pull_request("pr1", "feat", "a", &cancel)
        .await
        .unwrap();
    let before = pr.reviewer_ids();

    let reassignment = f
        .engine
        .reassign_reviewer("pr1", &before[1], &cancel)
        .await
        .unwrap();
    let after = reassignment.pull_request.reviewer_ids();

    assert_eq!(after[0], before[0]);
    assert_eq!(after[1], reassignment.replaced_by.id);
    assert!(!before.contains(&reassignment.replaced_by.id));
    assert_ne!(reassignment.replaced_by.id, "a");

    // Merge reloads from the database; order survives the round-trip.
    let merged = f.engine.merge_pull_request("pr1", &cancel).await.unwrap();
    assert_eq!(merged.reviewer_ids(), after);
}

#[tokio::test]
async fn test_duplicate_pull_request_leaves_no_trace() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    f.engine
        .create_team(
            "backend",
            vec![member("a", true), member("b", true), member("c", true)],
            &cancel,
        )
        .await
        .unwrap();
    f.engine
        .create_pull_request("pr1", "feat", "a", &cancel)
        .await
        .unwrap();

    let err = f
        .engine
        .create_pull_request("pr1", "again", "b", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    assert_eq!(count(&f.pool, "pull_requests").await, 1);
    assert_eq!(count(&f.pool, "pull_request_reviewers").await, 2);
    let author: String = sqlx::query_scalar("SELECT author_id FROM pull_requests WHERE id = 'pr1'")
        .fetch_one(&f.pool)
        .await
        .unwrap();
    assert_eq!(author, "a");
}

#[tokio::test]
async fn test_unique_violation_is_reported_as_already_exists() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    f.engine
        .create_team("backend", vec![member("a", true)], &cancel)
        .await
        .unwrap();
    let pr = f
        .engine
        .create_pull_request("pr1", "feat", "a", &cancel)
        .await
        .unwrap();

    // Bypass the existence check: the constraint alone must reject the row.
    let mut tx = f.engine.store().begin().await.unwrap();
    let err = SqlitePullRequestRepository
        .create(tx.conn(), &pr)
        .await
        .unwrap_err();
    tx.rollback().await.unwrap();
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn test_concurrent_creates_with_same_id() {
    let f = setup().await;
    let cancel = CancellationToken::new();
    f.engine
        .create_team(
            "backend",
            vec![member("a", true), member("b", true), member("c", true)],
            &cancel,
        )
        .await
        .unwrap();

    let engine = Arc::new(f.engine);
    for round in 0..10 {
        let id = format!("pr{round}");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let id = id.clone();
                tokio::spawn(async move {
                    engine
                        .create_pull_request(&id, "race", "a", &CancellationToken::new())
                        .await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(AppError::AlreadyExists { id: Some(existing), .. }) => {
                    assert_eq!(existing, id)
                }
                Err(other) => panic!("round {round}: losing create failed with {other:?}"),
            }
        }
        assert_eq!(successes, 1, "round {round}");
    }

    assert_eq!(count(&f.pool, "pull_requests").await, 10);
    assert!(count(&f.pool, "pull_request_reviewers").await <= 20);
}

#[tokio::test]
async fn test_author_without_teammates() {
    let f = setup().await;
    let cancel = CancellationToken::new();
    f.engine
        .create_team("solo", vec![member("a", true)], &cancel)
        .await
        .unwrap();

    let pr = f
        .engine
        .create_pull_request("pr1", "alone", "a", &cancel)
        .await
        .unwrap();
    assert!(pr.reviewers.is_empty());
    assert_eq!(count(&f.pool, "pull_request_reviewers").await, 0);

    let err = f
        .engine
        .create_pull_request("pr2", "ghost", "nobody", &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_user_reviews_lists_only_current_assignments() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    assert!(f.engine.user_reviews("nobody", &cancel).await.unwrap().is_empty());

    f.engine
        .create_team("backend", vec![member("a", true), member("b", true)], &cancel)
        .await
        .unwrap();
    f.engine
        .create_team("frontend", vec![member("x", true), member("y", true)], &cancel)
        .await
        .unwrap();

    for (id, author) in [("pr1", "a"), ("pr2", "a"), ("pr3", "x")] {
        f.engine
            .create_pull_request(id, "work", author, &cancel)
            .await
            .unwrap();
    }

    let reviews = f.engine.user_reviews("b", &cancel).await.unwrap();
    let ids: Vec<&str> = reviews.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["pr1", "pr2"]);
    assert!(reviews.iter().all(|r| r.author_id == "a"));

    let reviews = f.engine.user_reviews("y", &cancel).await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].id, "pr3");
}

#[tokio::test]
async fn test_team_registration() {
    let f = setup().await;
    let cancel = CancellationToken::new();

    let team = f
        .engine
        .create_team("backend", vec![member("b", true), member("a", false)], &cancel)
        .await
        .unwrap();
    assert_eq!(team.name, "backend");
    assert_eq!(team.members.len(), 2);

    let err = f
        .engine
        .create_team("backend", vec![member("z", true)], &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    // The rejected roster must not leak in.
    assert_eq!(count(&f.pool, "users").await, 2);

    let loaded = f.engine.get_team("backend", &cancel).await.unwrap();
    let ids: Vec<&str> = loaded.members.iter().map(|m| m.user_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(!loaded.members[0].is_active);

    let err = f.engine.get_team("missing", &cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Registering a user in another team moves them.
    f.engine
        .create_team("frontend", vec![member("a", true)], &cancel)
        .await
        .unwrap();
    let backend = f.engine.get_team("backend", &cancel).await.unwrap();
    assert_eq!(backend.members.len(), 1);
}

#[tokio::test]
async fn test_set_user_active_unknown_user() {
    let f = setup().await;

    let err = f
        .engine
        .set_user_active("ghost", true, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_ping() {
    let f = setup().await;
    f.engine.ping(&CancellationToken::new()).await.unwrap();
}
