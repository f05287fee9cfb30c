//! Bearer-token gate for protected routes.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{
    auth::extractors::AuthUser,
    error::{AppError, UnauthorizedReason},
    state::AppState,
};

/// Pulls the token out of `Authorization: Bearer <token>`.
///
/// `Ok(None)` means no header at all; `Err` means a header that is not a usable
/// bearer credential.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ()> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| ())?;
    let (scheme, token) = value.split_once(' ').ok_or(())?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(());
    }
    Ok(Some(token))
}

pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = match bearer_token(req.headers()) {
        Ok(Some(token)) => token,
        Ok(None) => {
            return Err(AppError::Unauthorized(UnauthorizedReason::MissingCredential));
        }
        Err(()) => {
            debug!("malformed Authorization header");
            return Err(AppError::Unauthorized(UnauthorizedReason::InvalidCredential));
        }
    };

    let user_id = state
        .auth
        .tokens()
        .verify(token)
        .map_err(|_| AppError::Unauthorized(UnauthorizedReason::InvalidCredential))?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn absent_header_is_missing() {
        assert_eq!(bearer_token(&HeaderMap::new()), Ok(None));
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")), Ok(Some("abc.def.ghi")));
        assert_eq!(bearer_token(&headers_with("bearer abc")), Ok(Some("abc")));
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert!(bearer_token(&headers_with("Basic dXNlcjpwdw==")).is_err());
        assert!(bearer_token(&headers_with("Bearer ")).is_err());
        assert!(bearer_token(&headers_with("Bearer")).is_err());
        assert!(bearer_token(&headers_with("abc.def.ghi")).is_err());
    }
}
