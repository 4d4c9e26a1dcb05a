//! User model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A team member who may author or review pull requests.
///
/// A user belongs to exactly one team at a time; re-registering the user
/// under another team moves them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    #[serde(rename = "user_id")]
    pub id: String,

    pub username: String,

    /// Only active users are picked as reviewers.
    pub is_active: bool,

    pub team_name: String,
}
