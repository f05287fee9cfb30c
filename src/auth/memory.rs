//! In-process user store with the same uniqueness semantics as the Postgres one.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::auth::repo::{StoreError, UserStore};
use crate::auth::repo_types::{User, UserChanges};

#[derive(Default)]
struct Inner {
    next_id: i64,
    users: HashMap<i64, User>,
}

impl Inner {
    fn username_taken(&self, username: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.username == username && Some(u.id) != except)
    }
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.users.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        // check and insert under one write lock
        let mut inner = self.inner.write().await;
        if inner.username_taken(username, None) {
            return Err(StoreError::DuplicateUsername);
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn update(&self, id: i64, changes: UserChanges) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(username) = changes.username.as_deref() {
            if inner.username_taken(username, Some(id)) {
                return Err(StoreError::DuplicateUsername);
            }
        }
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(false);
        };
        if let Some(username) = changes.username {
            user.username = username;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        Ok(true)
    }
}
