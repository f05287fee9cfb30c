use crate::auth::{
    jwt::TokenKeys,
    memory::MemoryUserStore,
    password::PasswordHasher,
    repo::{PgUserStore, UserStore},
    AuthService,
};
use crate::config::{AppConfig, StoreKind};
use crate::db;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
}

impl AppState {
    /// Connects the configured store and wires the auth core. Fails if the
    /// store is unreachable or its schema cannot be migrated.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let users: Arc<dyn UserStore> = match config.store {
            StoreKind::Postgres => {
                let pool = db::connect(&config.database).await?;
                db::migrate(&pool).await?;
                Arc::new(PgUserStore::new(pool))
            }
            StoreKind::Memory => {
                warn!("using in-memory user store; data is lost on restart");
                Arc::new(MemoryUserStore::new())
            }
        };
        Self::from_parts(&config, users)
    }

    pub fn from_parts(config: &AppConfig, users: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        if config.jwt.uses_default_secret() {
            warn!("JWT_SECRET is unset; using the placeholder secret. Override it in production");
        }

        let hasher = PasswordHasher::from_config(&config.hash)?;
        let tokens = TokenKeys::from_config(&config.jwt);
        let auth = AuthService::new(
            users,
            hasher,
            tokens,
            Duration::from_secs(config.store_timeout_secs),
        );
        info!(store = ?config.store, "auth service ready");

        Ok(Self { auth })
    }
}
