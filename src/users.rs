/// User directory
///
/// Users are an external collaborator of the token core: this module only
/// reads them. The `UserDirectory` port has a Postgres implementation for
/// production and an in-memory one used by the hermetic test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub roles: Vec<String>,
    /// Bumped whenever the credential changes; access tokens minted before
    /// this instant are no longer honored.
    pub password_changed_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user by login identifier (lowercased email).
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Look up a user by ID.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, roles, password_changed_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, roles, password_changed_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

/// In-process directory for tests and embedded setups.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(user.id, user);
    }

    /// Move a user's password-change marker, invalidating every access
    /// token minted before `changed_at`.
    pub fn set_password_changed_at(&self, id: Uuid, changed_at: DateTime<Utc>) {
        let mut users = self
            .users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(user) = users.get_mut(&id) {
            user.password_changed_at = changed_at;
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self
            .users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let users = self
            .users
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(users.get(&id).cloned())
    }
}
