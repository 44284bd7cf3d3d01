use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// The failure classes clients are expected to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    PolicyViolation,
    Conflict,
    BadRequest,
    Unauthorized,
    Forbidden,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Attempt {0} has already been submitted")]
    AlreadySubmitted(Uuid),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidState(_) | Error::AlreadySubmitted(_) => ErrorKind::InvalidState,
            Error::PolicyViolation(_) => ErrorKind::PolicyViolation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::BadRequest(_) | Error::Validation(_) => ErrorKind::BadRequest,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::Config(_) | Error::Database(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Error::AlreadySubmitted(_) => "already_submitted",
            Error::Validation(_) => "validation_failed",
            _ => match self.kind() {
                ErrorKind::NotFound => "not_found",
                ErrorKind::InvalidState => "invalid_state",
                ErrorKind::PolicyViolation => "policy_violation",
                ErrorKind::Conflict => "conflict",
                ErrorKind::BadRequest => "bad_request",
                ErrorKind::Unauthorized => "unauthorized",
                ErrorKind::Forbidden => "forbidden",
                ErrorKind::Internal => "internal_error",
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let (status, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::InvalidState(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::AlreadySubmitted(_) => (StatusCode::CONFLICT, self.to_string()),
            Error::PolicyViolation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Error::Validation(err) => (StatusCode::BAD_REQUEST, err.to_string()),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            other => {
                tracing::error!(error = %other, "Request failed with an internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": code, "message": message }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(format!(
                "Concurrent modification rejected ({})",
                db.constraint().unwrap_or("unique constraint")
            )),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => Error::Conflict(format!(
                "Referenced data is still in use ({})",
                db.constraint().unwrap_or("foreign key")
            )),
            other => Error::Database(other),
        }
    }
}
