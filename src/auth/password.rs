use argon2::{
    password_hash::{PasswordHash, SaltString},
    Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier as _, Version,
};
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::error;

use crate::config::HashConfig;

/// The stored hash could not be parsed as a PHC string.
#[derive(Error, Debug)]
#[error("malformed password hash: {0}")]
pub struct MalformedHash(String);

/// Argon2id hasher with a fixed cost. Cheap to clone.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    dummy_hash: String,
}

impl PasswordHasher {
    pub fn from_config(cfg: &HashConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.iterations, cfg.parallelism, None)
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut hasher = Self {
            argon2,
            dummy_hash: String::new(),
        };
        // Same cost as real hashes so dummy verification takes as long as a real one.
        hasher.dummy_hash = hasher.hash("dummy-password-for-timing")?;
        Ok(hasher)
    }

    pub fn hash(&self, plain: &str) -> anyhow::Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(plain.as_bytes(), &salt)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok(hash)
    }

    /// Returns `Ok(false)` on mismatch. A malformed `hash` costs one dummy
    /// verification before erroring.
    pub fn verify(&self, plain: &str, hash: &str) -> Result<bool, MalformedHash> {
        match PasswordHash::new(hash) {
            Ok(parsed) => Ok(self
                .argon2
                .verify_password(plain.as_bytes(), &parsed)
                .is_ok()),
            Err(e) => {
                self.verify_dummy(plain);
                Err(MalformedHash(e.to_string()))
            }
        }
    }

    /// Burns one verification's worth of work against an internal hash.
    pub fn verify_dummy(&self, plain: &str) {
        if let Ok(parsed) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.argon2.verify_password(plain.as_bytes(), &parsed);
        }
    }
}
