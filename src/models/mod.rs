//! Data models for the application.
//!
//! These models represent the entities stored in the SQLite database and
//! returned from the review engine. Row-shaped models derive `FromRow`
//! for SQLx queries; everything derives Serialize for the HTTP API.

pub mod pull_request;
pub mod team;
pub mod user;

// Re-exports for convenient access
pub use pull_request::{PullRequest, PullRequestRow, PullRequestShort, PullRequestStatus};
pub use team::{Team, TeamMember};
pub use user::User;
