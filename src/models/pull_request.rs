//! Pull request model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::User;

/// Status of a pull request.
///
/// Stored as `OPEN` / `MERGED` text; any other stored value fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum PullRequestStatus {
    Open,
    Merged,
}

impl PullRequestStatus {
    /// Storage representation (`OPEN` / `MERGED`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pull request together with its assigned reviewers.
///
/// `merged_at` is set if and only if the status is `MERGED`; the author is
/// never one of the reviewers and reviewer ids are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,
    pub name: String,
    pub author_id: String,
    pub status: PullRequestStatus,

    /// Creation timestamp (Unix seconds).
    pub created_at: i64,

    /// Merge timestamp (Unix seconds, if merged).
    pub merged_at: Option<i64>,

    /// Assigned reviewers, at most two.
    pub reviewers: Vec<User>,
}

impl PullRequest {
    /// Maximum number of reviewers assigned when a pull request is created.
    pub const MAX_REVIEWERS: usize = 2;

    /// Check if the pull request is merged.
    pub fn is_merged(&self) -> bool {
        self.status == PullRequestStatus::Merged
    }

    /// Ids of the assigned reviewers, in assignment order.
    pub fn reviewer_ids(&self) -> Vec<String> {
        self.reviewers.iter().map(|r| r.id.clone()).collect()
    }

    /// Check whether `user_id` is currently one of the reviewers.
    pub fn has_reviewer(&self, user_id: &str) -> bool {
        self.reviewers.iter().any(|r| r.id == user_id)
    }

    /// Everyone currently involved: the author followed by every reviewer.
    pub fn participant_ids(&self) -> Vec<String> {
        std::iter::once(self.author_id.clone())
            .chain(self.reviewers.iter().map(|r| r.id.clone()))
            .collect()
    }

    /// Swap `old_id` for `replacement`, keeping every other reviewer in place.
    ///
    /// Returns `false` if `old_id` was not a reviewer.
    pub fn replace_reviewer(&mut self, old_id: &str, replacement: User) -> bool {
        match self.reviewers.iter_mut().find(|r| r.id == old_id) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Short projection without reviewer detail.
    pub fn to_short(&self) -> PullRequestShort {
        PullRequestShort {
            id: self.id.clone(),
            name: self.name.clone(),
            author_id: self.author_id.clone(),
            status: self.status,
        }
    }
}

/// Row shape of the `pull_requests` table.
#[derive(Debug, Clone, FromRow)]
pub struct PullRequestRow {
    pub id: String,
    pub name: String,
    pub author_id: String,
    pub status: PullRequestStatus,
    pub created_at: i64,
    pub merged_at: Option<i64>,
}

impl PullRequestRow {
    /// Attach the resolved reviewers to build the full pull request.
    pub fn with_reviewers(self, reviewers: Vec<User>) -> PullRequest {
        PullRequest {
            id: self.id,
            name: self.name,
            author_id: self.author_id,
            status: self.status,
            created_at: self.created_at,
            merged_at: self.merged_at,
            reviewers,
        }
    }
}

/// Pull request projection used for per-user review listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PullRequestShort {
    #[serde(rename = "pull_request_id")]
    pub id: String,

    #[serde(rename = "pull_request_name")]
    pub name: String,

    pub author_id: String,

    pub status: PullRequestStatus,
}
