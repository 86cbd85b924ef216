use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend failed; retries (if any) are exhausted.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The poll does not exist.
    #[error("poll `{0}` does not exist")]
    InvalidPoll(Uuid),
    /// The option does not belong to the poll.
    #[error("option `{option_id}` does not belong to poll `{poll_id}`")]
    InvalidOption { poll_id: Uuid, option_id: Uuid },
    /// The identity already voted on this poll.
    #[error("this identity has already voted on poll `{poll_id}`")]
    DuplicateVote { poll_id: Uuid },
    /// A vote was admitted to the ledger but its increment could not be applied.
    #[error("vote `{vote_id}` on option `{option_id}` was recorded but not yet counted")]
    InconsistentState {
        poll_id: Uuid,
        option_id: Uuid,
        vote_id: Uuid,
    },
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Referenced poll not found.
    #[error("{0}")]
    InvalidPoll(String),
    /// Referenced option is not part of the poll.
    #[error("{0}")]
    InvalidOption(String),
    /// Identity already voted.
    #[error("{0}")]
    DuplicateVote(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Vote recorded but its count could not be applied yet.
    #[error("{0}")]
    InconsistentState(String),
}

impl AppError {
    /// Machine-readable rejection code returned alongside the message.
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_input",
            AppError::InvalidPoll(_) => "invalid_poll",
            AppError::InvalidOption(_) => "invalid_option",
            AppError::DuplicateVote(_) => "duplicate_vote",
            AppError::ServiceUnavailable(_) => "storage_unavailable",
            AppError::InconsistentState(_) => "inconsistent_state",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidPoll(_) => StatusCode::NOT_FOUND,
            AppError::InvalidOption(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateVote(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InconsistentState(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidPoll(_) => AppError::InvalidPoll(message),
            ServiceError::InvalidOption { .. } => AppError::InvalidOption(message),
            ServiceError::DuplicateVote { .. } => AppError::DuplicateVote(message),
            ServiceError::InconsistentState { .. } => AppError::InconsistentState(message),
        }
    }
}

/// JSON body returned with every rejected request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable rejection code (`duplicate_vote`, `invalid_option`, ...).
    pub reason: String,
    /// Human-readable description.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorBody {
            reason: self.reason().to_string(),
            message: self.to_string(),
        });

        (self.status(), payload).into_response()
    }
}
