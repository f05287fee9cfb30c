//! Request-boundary error type. Every fault raised by the auth core ends up here
//! and is translated into a status code plus a JSON `{"error": ...}` body.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::repo::StoreError;

/// Why a protected request was turned away. Logged, never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    /// No `Authorization` header at all.
    MissingCredential,
    /// Header present but not a valid bearer token.
    InvalidCredential,
    /// Handler reached without the middleware having authenticated the request.
    MissingContext,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("at least one of new_username or new_password must be provided")]
    NoFieldsProvided,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("unauthorized ({0:?})")]
    Unauthorized(UnauthorizedReason),

    #[error("invalid token")]
    InvalidToken,

    #[error("username already taken")]
    DuplicateUsername,

    #[error("user not found")]
    NotFound,

    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateUsername => AppError::DuplicateUsername,
            other => AppError::Storage(other),
        }
    }
}

/// Undecodable bodies, wrong field types and a missing JSON content type all
/// surface as the same validation fault. Parser details are only logged.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        debug!(reason = %rejection.body_text(), "request body rejected");
        AppError::Validation("Invalid request body".into())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::NoFieldsProvided => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::Unauthorized(_) | AppError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AppError::DuplicateUsername => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal faults and unauthorized reasons stay opaque.
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::NoFieldsProvided => {
                "At least one of new_username or new_password must be provided".to_string()
            }
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::Unauthorized(_) => "Unauthorized".to_string(),
            AppError::InvalidToken => "Invalid token".to_string(),
            AppError::DuplicateUsername => "Username already taken".to_string(),
            AppError::NotFound => "User not found".to_string(),
            AppError::Storage(_) | AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else if let AppError::Unauthorized(reason) = &self {
            warn!(?reason, "request rejected");
        }

        let body = Json(json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
