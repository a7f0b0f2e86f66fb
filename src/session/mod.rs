/// Session store
///
/// Durable record of outstanding refresh-token sessions, keyed by the
/// one-way fingerprint of the currently valid token. Rotation is an atomic
/// compare-and-swap on that fingerprint: the store is the only shared
/// mutable state in the system and `rotate` is its only synchronization
/// primitive.

mod memory;
mod postgres;

pub use memory::InMemorySessionStore;
pub use postgres::PgSessionStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;

/// One refresh-token session slot. The token itself is never stored, only
/// its fingerprint; `token_hash` changes in place on every rotation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    /// Lineage of tokens descending from one login. Revocation on reuse
    /// detection hits the whole family.
    pub family_id: Uuid,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Client metadata captured at login. Informational only.
#[derive(Debug, Clone, Default)]
pub struct SessionMeta {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub meta: SessionMeta,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new, non-revoked session.
    ///
    /// # Errors
    /// `DuplicateToken` if the fingerprint is already stored
    async fn create(&self, new: NewSession) -> Result<Session, StoreError>;

    /// Look up a session by token fingerprint. Expired sessions are
    /// excluded; revoked sessions are returned (callers distinguish).
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError>;

    /// Atomically swap the session's fingerprint and expiry, conditioned on
    /// the current fingerprint still being `expected_hash` and the session
    /// not being revoked.
    ///
    /// # Errors
    /// `Conflict` when the condition no longer holds: another rotation
    /// already consumed the presented token
    async fn rotate(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    /// Revoke a single session (logout path). Revoking an already-revoked
    /// or missing session is a no-op.
    async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError>;

    /// Revoke every active session in a family. Returns the number of
    /// sessions newly revoked.
    async fn revoke_family(&self, user_id: Uuid, family_id: Uuid) -> Result<u64, StoreError>;
}
