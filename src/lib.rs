//! User-account service: registration, bearer-token login, and an
//! authenticated profile read/update over a relational store.

pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod state;

pub use app::{build_app, serve};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use state::AppState;
