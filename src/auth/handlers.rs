use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{CredentialsRequest, MessageResponse, TokenResponse, UpdateProfileRequest},
        extractors::AuthUser,
        middleware::require_bearer,
        services::{ProfileUpdate, UserProfile},
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Routes under `/auth`, all behind the bearer middleware.
pub fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).post(update_profile))
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let Json(payload) = payload?;
    state
        .auth
        .register(&payload.username, &payload.password)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("User registered successfully")),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> AppResult<Json<TokenResponse>> {
    let Json(payload) = payload?;
    let token = state
        .auth
        .login(&payload.username, &payload.password)
        .await?;
    Ok(Json(TokenResponse { token }))
}

/// Tokens are stateless; the client discards its copy.
#[instrument]
pub async fn logout(AuthUser(user_id): AuthUser) -> Json<MessageResponse> {
    info!(user_id, "user logged out");
    Json(MessageResponse::new("Logged out successfully"))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<UserProfile>> {
    let profile = state.auth.get_profile(user_id).await?;
    Ok(Json(profile))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> AppResult<Json<MessageResponse>> {
    let Json(payload) = payload?;
    let update = ProfileUpdate {
        current_password: payload.current_password,
        new_username: payload.new_username,
        new_password: payload.new_password,
    };
    state
        .auth
        .update_profile(user_id, update)
        .await
        .map_err(|e| match e {
            // A wrong current password is a bad request here, not a failed login.
            AppError::InvalidCredentials => {
                AppError::Validation("Current password is incorrect".into())
            }
            other => other,
        })?;
    Ok(Json(MessageResponse::new("Profile updated successfully")))
}
