//! Application error types.
//!
//! These errors are serializable so the HTTP layer can return them as
//! structured JSON, and they carry a [`ErrorKind`] so callers can map them
//! to responses without inspecting message text.

use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;

/// Coarse classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    InvalidInput,
    Internal,
}

/// Business rule that blocked a well-formed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    /// Reviewers cannot be changed once the pull request is merged.
    PullRequestMerged,
    /// The user is not a reviewer of the pull request.
    NotAssigned,
    /// No active team member is left to take over the review.
    NoCandidate,
}

impl ConflictReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::PullRequestMerged => "cannot reassign on merged PR",
            Self::NotAssigned => "reviewer is not assigned to this PR",
            Self::NoCandidate => "no active replacement candidate in team",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Entity named by [`AppError::NotFound`] and [`AppError::AlreadyExists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resource {
    PullRequest,
    Team,
    User,
    /// The author of a new pull request, or the team it belongs to.
    Author,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequest => "PullRequest",
            Self::Team => "Team",
            Self::User => "User",
            Self::Author => "Author",
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level errors returned by the review engine.
///
/// All variants serialize to a structured JSON object.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: Resource,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A resource with the same identifier already exists.
    #[error("Already exists: {resource}")]
    AlreadyExists {
        resource: Resource,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The request conflicts with the current state.
    #[error("Conflict: {reason}")]
    Conflict { reason: ConflictReason },

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// The caller cancelled the workflow or its deadline passed.
    #[error("Cancelled: {operation}")]
    Cancelled { operation: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: Resource, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: Some(id.into()),
        }
    }

    /// Create an already exists error with ID.
    pub fn already_exists(resource: Resource, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource,
            id: Some(id.into()),
        }
    }

    /// Create a conflict error.
    pub fn conflict(reason: ConflictReason) -> Self {
        Self::Conflict { reason }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a database error with optional operation context.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a cancellation error for the named step.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Database { .. } | Self::Cancelled { .. } | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Get the conflict reason if this is a conflict error.
    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        match self {
            Self::Conflict { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Check if this is a cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err.operation() {
            Some(op) => Self::database_with_op(err.root_message(), op),
            None => Self::database(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = AppError::database("connection failed");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"Database\""));
        assert!(json.contains("connection failed"));
    }

    #[test]
    fn test_not_found_with_id() {
        let err = AppError::not_found_with_id(Resource::PullRequest, "pr-1");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"resource\":\"PullRequest\""));
        assert!(json.contains("\"id\":\"pr-1\""));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_conflict_reason_serialization() {
        let err = AppError::conflict(ConflictReason::NoCandidate);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"reason\":\"NO_CANDIDATE\""));
        assert_eq!(err.conflict_reason(), Some(ConflictReason::NoCandidate));
    }

    #[test]
    fn test_optional_fields_not_serialized() {
        let err = AppError::database("error");
        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("operation"));
    }

    #[test]
    fn test_kinds_separate_business_and_transient_failures() {
        assert_eq!(
            AppError::already_exists(Resource::PullRequest, "pr-1").kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(AppError::cancelled("merge").kind(), ErrorKind::Internal);
        assert_eq!(AppError::database("boom").kind(), ErrorKind::Internal);
        assert_eq!(
            AppError::conflict(ConflictReason::NotAssigned).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn test_db_operation_context_is_kept() {
        let err = AppError::from(DbError::injected("insert reviewer link").context("create"));
        match err {
            AppError::Database { operation, .. } => {
                assert_eq!(operation.as_deref(), Some("create"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resource_keeps_its_name() {
        let err = AppError::already_exists(Resource::Team, "backend");
        assert_eq!(err.to_string(), "Already exists: Team");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["details"]["resource"], "Team");
        assert_eq!(json["details"]["id"], "backend");
    }

    #[test]
    fn test_display_impl() {
        let err = AppError::conflict(ConflictReason::PullRequestMerged);
        assert_eq!(format!("{}", err), "Conflict: cannot reassign on merged PR");
    }
}
