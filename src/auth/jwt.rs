use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::{
    auth::claims::Claims,
    config::{JwtConfig, MAX_JWT_TTL_MINUTES},
    error::AppError,
};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Signing and verification keys plus the validation rules tokens must pass.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    validation: Validation,
}

impl TokenKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        // Pinning the algorithm rejects alternate-algorithm and `none` tokens.
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.set_audience(std::slice::from_ref(&cfg.audience));
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));

        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs(cfg.ttl_minutes.clamp(1, MAX_JWT_TTL_MINUTES) as u64 * 60),
            validation,
        }
    }

    pub fn issue(&self, user_id: i64) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = self.sign(&claims)?;
        debug!(user_id, "jwt signed");
        Ok(token)
    }

    fn sign(&self, claims: &Claims) -> anyhow::Result<String> {
        Ok(encode(&Header::new(ALGORITHM), claims, &self.encoding)?)
    }

    /// Returns the subject of a valid token. Every failure collapses into
    /// `InvalidToken`; the cause is only logged.
    pub fn verify(&self, token: &str) -> Result<i64, AppError> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => {
                debug!(user_id = data.claims.sub, "jwt verified");
                Ok(data.claims.sub)
            }
            Err(e) => {
                debug!(reason = ?e.kind(), "jwt rejected");
                Err(AppError::InvalidToken)
            }
        }
    }
}
