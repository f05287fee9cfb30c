use std::{future::Future, sync::Arc, time::Duration};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        jwt::TokenKeys,
        password::PasswordHasher,
        repo::{StoreError, UserStore},
        repo_types::{User, UserChanges},
    },
    error::{AppError, AppResult},
};

/// Outward view of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            created_at: user.created_at,
        }
    }
}

/// Requested profile change. Empty strings count as "not supplied".
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub current_password: String,
    pub new_username: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    tokens: TokenKeys,
    store_timeout: Duration,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        tokens: TokenKeys,
        store_timeout: Duration,
    ) -> Self {
        Self {
            users,
            hasher,
            tokens,
            store_timeout,
        }
    }

    pub fn tokens(&self) -> &TokenKeys {
        &self.tokens
    }

    /// Runs one store call under the configured deadline.
    async fn store<T, F>(&self, call: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(res) => res.map_err(AppError::from),
            Err(_) => {
                error!(timeout = ?self.store_timeout, "store call timed out");
                Err(AppError::Storage(StoreError::Timeout))
            }
        }
    }

    /// Runs argon2 work on the blocking pool so request tasks keep moving.
    async fn hashing<T, F>(&self, work: F) -> AppResult<T>
    where
        F: FnOnce(&PasswordHasher) -> T + Send + 'static,
        T: Send + 'static,
    {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || work(&hasher))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("password task failed: {e}")))
    }

    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> AppResult<User> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "Username and password are required".into(),
            ));
        }

        let password = password.to_string();
        let hash = self.hashing(move |h| h.hash(&password)).await??;

        // The store's unique constraint decides races; no lookup beforehand.
        let user = match self.store(self.users.insert(username, &hash)).await {
            Ok(u) => u,
            Err(AppError::DuplicateUsername) => {
                warn!(username, "username already registered");
                return Err(AppError::DuplicateUsername);
            }
            Err(e) => return Err(e),
        };

        info!(user_id = user.id, username = %user.username, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> AppResult<String> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AppError::Validation(
                "Username and password are required".into(),
            ));
        }

        let found = self.store(self.users.find_by_username(username)).await?;
        let password = password.to_string();
        let Some(user) = found else {
            self.hashing(move |h| h.verify_dummy(&password)).await?;
            warn!(username, "login unknown username");
            return Err(AppError::InvalidCredentials);
        };

        let stored = user.password_hash.clone();
        match self.hashing(move |h| h.verify(&password, &stored)).await? {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id = user.id, "login invalid password");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => {
                error!(user_id = user.id, error = %e, "stored password hash is corrupt");
                return Err(AppError::InvalidCredentials);
            }
        }

        let token = self.tokens.issue(user.id)?;
        info!(user_id = user.id, "user logged in");
        Ok(token)
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: i64) -> AppResult<UserProfile> {
        let user = self
            .store(self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| {
                warn!(user_id, "token subject no longer resolves to a user");
                AppError::NotFound
            })?;
        Ok(user.into())
    }

    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, user_id: i64, update: ProfileUpdate) -> AppResult<()> {
        let new_username = update
            .new_username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let new_password = update.new_password.filter(|p| !p.is_empty());

        if update.current_password.is_empty() {
            return Err(AppError::Validation("Current password is required".into()));
        }
        if new_username.is_none() && new_password.is_none() {
            return Err(AppError::NoFieldsProvided);
        }

        let user = self
            .store(self.users.find_by_id(user_id))
            .await?
            .ok_or(AppError::NotFound)?;

        // Re-authenticate before touching anything.
        let (current, stored) = (update.current_password, user.password_hash);
        match self.hashing(move |h| h.verify(&current, &stored)).await? {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id, "profile update with wrong current password");
                return Err(AppError::InvalidCredentials);
            }
            Err(e) => {
                error!(user_id, error = %e, "stored password hash is corrupt");
                return Err(AppError::InvalidCredentials);
            }
        }

        let password_hash = match new_password {
            Some(p) => Some(self.hashing(move |h| h.hash(&p)).await??),
            None => None,
        };
        let changes = UserChanges {
            username: new_username,
            password_hash,
        };
        let changed_username = changes.username.is_some();
        let changed_password = changes.password_hash.is_some();

        if !self.store(self.users.update(user_id, changes)).await? {
            return Err(AppError::NotFound);
        }

        info!(user_id, changed_username, changed_password, "profile updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::memory::MemoryUserStore,
        config::{HashConfig, JwtConfig},
    };

    fn service_with(store: Arc<MemoryUserStore>) -> AuthService {
        let hasher = PasswordHasher::from_config(&HashConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let tokens = TokenKeys::from_config(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-iss".into(),
            audience: "test-aud".into(),
            ttl_minutes: 60,
        });
        AuthService::new(store, hasher, tokens, Duration::from_secs(5))
    }

    fn service() -> (AuthService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        (service_with(store.clone()), store)
    }

    #[tokio::test]
    async fn register_then_login_yields_token_for_user() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw12345").await.unwrap();
        let token = svc.login("alice", "pw12345").await.unwrap();
        assert_eq!(svc.tokens().verify(&token).unwrap(), user.id);
    }

    #[tokio::test]
    async fn register_rejects_empty_fields() {
        let (svc, store) = service();
        assert!(matches!(
            svc.register("", "pw").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.register("   ", "pw").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            svc.register("alice", "").await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn register_trims_username() {
        let (svc, _) = service();
        let user = svc.register("  alice ", "pw").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(svc.login("alice", "pw").await.is_ok());
    }

    #[tokio::test]
    async fn register_duplicate_username() {
        let (svc, _) = service();
        svc.register("alice", "pw1").await.unwrap();
        assert!(matches!(
            svc.register("alice", "pw2").await,
            Err(AppError::DuplicateUsername)
        ));
    }

    #[tokio::test]
    async fn concurrent_register_admits_exactly_one() {
        let (svc, _) = service();
        let (a, b) = tokio::join!(svc.register("dave", "pw-a"), svc.register("dave", "pw-b"));
        let results = [a, b];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::DuplicateUsername)))
            .count();
        assert_eq!((ok, dup), (1, 1));
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let (svc, _) = service();
        svc.register("alice", "pw12345").await.unwrap();

        let unknown = svc.login("nobody", "pw12345").await.unwrap_err();
        let wrong = svc.login("alice", "nope").await.unwrap_err();
        assert!(matches!(unknown, AppError::InvalidCredentials));
        assert!(matches!(wrong, AppError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn login_with_corrupt_hash_is_invalid_credentials() {
        let (svc, store) = service();
        store.insert("mallory", "garbage").await.unwrap();
        assert!(matches!(
            svc.login("mallory", "pw").await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn get_profile_hides_hash_and_reports_missing() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw").await.unwrap();
        let profile = svc.get_profile(user.id).await.unwrap();
        assert_eq!(profile.id, user.id);
        assert_eq!(profile.username, "alice");

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json["created_at"].is_string());

        assert!(matches!(svc.get_profile(999).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn update_without_correct_password_never_mutates() {
        let (svc, store) = service();
        let user = svc.register("alice", "pw").await.unwrap();

        let err = svc
            .update_profile(
                user.id,
                ProfileUpdate {
                    current_password: "wrong".into(),
                    new_username: Some("bob".into()),
                    new_password: Some("new-pw".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.password_hash, user.password_hash);
    }

    #[tokio::test]
    async fn update_requires_some_field() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw").await.unwrap();
        let err = svc
            .update_profile(
                user.id,
                ProfileUpdate {
                    current_password: "pw".into(),
                    new_username: Some("".into()),
                    new_password: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoFieldsProvided));
    }

    #[tokio::test]
    async fn update_requires_current_password() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw").await.unwrap();
        let err = svc
            .update_profile(
                user.id,
                ProfileUpdate {
                    current_password: String::new(),
                    new_username: Some("bob".into()),
                    new_password: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_checks_current_password_before_fields() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw").await.unwrap();
        let err = svc
            .update_profile(user.id, ProfileUpdate::default())
            .await
            .unwrap_err();
        match err {
            AppError::Validation(msg) => assert_eq!(msg, "Current password is required"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn hashing_does_not_block_the_runtime() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (svc, _) = service();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            })
        };

        svc.register("alice", "pw").await.unwrap();
        ticker.abort();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn update_username_only() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw").await.unwrap();
        svc.update_profile(
            user.id,
            ProfileUpdate {
                current_password: "pw".into(),
                new_username: Some("alicia".into()),
                new_password: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(svc.get_profile(user.id).await.unwrap().username, "alicia");
        assert!(svc.login("alicia", "pw").await.is_ok());
        assert!(matches!(
            svc.login("alice", "pw").await,
            Err(AppError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn update_password_only() {
        let (svc, _) = service();
        let user = svc.register("alice", "pw").await.unwrap();
        svc.update_profile(
            user.id,
            ProfileUpdate {
                current_password: "pw".into(),
                new_username: None,
                new_password: Some("fresh-pw".into()),
            },
        )
        .await
        .unwrap();

        assert!(svc.login("alice", "fresh-pw").await.is_ok());
        assert!(svc.login("alice", "pw").await.is_err());
        assert_eq!(svc.get_profile(user.id).await.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn update_to_taken_username() {
        let (svc, _) = service();
        let alice = svc.register("alice", "pw").await.unwrap();
        svc.register("bob", "pw").await.unwrap();
        let err = svc
            .update_profile(
                alice.id,
                ProfileUpdate {
                    current_password: "pw".into(),
                    new_username: Some("bob".into()),
                    new_password: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateUsername));
    }

    #[tokio::test]
    async fn update_for_missing_user() {
        let (svc, _) = service();
        let err = svc
            .update_profile(
                404,
                ProfileUpdate {
                    current_password: "pw".into(),
                    new_username: Some("ghost".into()),
                    new_password: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }

    struct StalledStore;

    #[async_trait::async_trait]
    impl UserStore for StalledStore {
        async fn insert(&self, _u: &str, _h: &str) -> Result<User, StoreError> {
            std::future::pending().await
        }
        async fn find_by_username(&self, _u: &str) -> Result<Option<User>, StoreError> {
            std::future::pending().await
        }
        async fn find_by_id(&self, _id: i64) -> Result<Option<User>, StoreError> {
            std::future::pending().await
        }
        async fn update(&self, _id: i64, _c: UserChanges) -> Result<bool, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn store_calls_are_bounded_by_deadline() {
        let base = service_with(Arc::new(MemoryUserStore::new()));
        let svc = AuthService::new(
            Arc::new(StalledStore),
            base.hasher.clone(),
            base.tokens.clone(),
            Duration::from_millis(50),
        );
        let err = svc.get_profile(1).await.unwrap_err();
        assert!(matches!(err, AppError::Storage(StoreError::Timeout)));
    }
}
