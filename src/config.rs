use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// Placeholder signing secret used when `JWT_SECRET` is unset. Must be overridden in production.
pub const DEFAULT_JWT_SECRET: &str = "your_jwt_secret_key";

/// Upper bound on token lifetime: one year.
pub const MAX_JWT_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

impl JwtConfig {
    pub fn uses_default_secret(&self) -> bool {
        self.secret == DEFAULT_JWT_SECRET
    }
}

/// Argon2 cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreKind,
    pub database: DatabaseConfig,
    pub store_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub hash: HashConfig,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys fall back to
    /// defaults; set-but-unparsable numbers are an error.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let store = match var("STORE", "postgres").to_lowercase().as_str() {
            "postgres" => StoreKind::Postgres,
            "memory" => StoreKind::Memory,
            other => anyhow::bail!("unknown STORE `{other}` (expected postgres or memory)"),
        };

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            host: var("DB_HOST", "localhost"),
            port: parse_or(&lookup, "DB_PORT", 5432)?,
            user: var("DB_USER", "postgres"),
            password: var("DB_PASSWORD", ""),
            name: var("DB_NAME", "accounts"),
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout_secs: parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
        };

        let jwt = JwtConfig {
            secret: var("JWT_SECRET", DEFAULT_JWT_SECRET),
            issuer: var("JWT_ISSUER", "accounts"),
            audience: var("JWT_AUDIENCE", "accounts-users"),
            ttl_minutes: parse_or(&lookup, "JWT_TTL_MINUTES", 60 * 24)?,
        };
        if !(1..=MAX_JWT_TTL_MINUTES).contains(&jwt.ttl_minutes) {
            anyhow::bail!("JWT_TTL_MINUTES must be between 1 and {MAX_JWT_TTL_MINUTES}");
        }

        let defaults = HashConfig::default();
        let hash = HashConfig {
            memory_kib: parse_or(&lookup, "HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&lookup, "HASH_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&lookup, "HASH_PARALLELISM", defaults.parallelism)?,
        };

        Ok(Self {
            store,
            database,
            store_timeout_secs: parse_or(&lookup, "STORE_TIMEOUT_SECS", 5)?,
            jwt,
            hash,
            host: var("APP_HOST", "0.0.0.0"),
            port: parse_or(&lookup, "PORT", 8080)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: `{raw}`")),
        None => Ok(default),
    }
}
