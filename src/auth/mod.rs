use crate::state::AppState;
use axum::Router;

mod claims;
mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod memory;
pub mod middleware;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;

pub use extractors::AuthUser;
pub use services::AuthService;

/// `/register`, `/login` and the bearer-protected `/auth/*` routes.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .nest("/auth", handlers::protected_routes(state))
}
