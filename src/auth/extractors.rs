use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::{AppError, UnauthorizedReason};

/// Subject of the verified bearer token, placed in request extensions by
/// [`require_bearer`](super::middleware::require_bearer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or(AppError::Unauthorized(UnauthorizedReason::MissingContext))
    }
}
