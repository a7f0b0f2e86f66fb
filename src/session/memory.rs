/// In-process session store.
///
/// Same contract as the Postgres store, guarded by a single mutex that is
/// never held across an await. Backs the hermetic test suites and embedded
/// single-process setups.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{NewSession, Session, SessionStore};
use crate::error::StoreError;

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        let mut sessions = self.lock();

        if sessions.values().any(|s| s.token_hash == new.token_hash) {
            return Err(StoreError::DuplicateToken);
        }

        let session = Session {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            token_hash: new.token_hash,
            family_id: new.family_id,
            user_agent: new.meta.user_agent,
            ip: new.meta.ip,
            revoked_at: None,
            expires_at: new.expires_at,
            created_at: Utc::now(),
        };
        sessions.insert(session.id, session.clone());

        Ok(session)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        let sessions = self.lock();

        Ok(sessions
            .values()
            .find(|s| s.token_hash == token_hash && s.expires_at > now)
            .cloned())
    }

    async fn rotate(
        &self,
        session_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.lock();

        if sessions
            .values()
            .any(|s| s.id != session_id && s.token_hash == new_hash)
        {
            return Err(StoreError::DuplicateToken);
        }

        let session = sessions.get_mut(&session_id).ok_or(StoreError::Conflict)?;
        if session.token_hash != expected_hash || session.is_revoked() {
            return Err(StoreError::Conflict);
        }

        session.token_hash = new_hash.to_string();
        session.expires_at = new_expiry;

        Ok(session.clone())
    }

    async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError> {
        let mut sessions = self.lock();

        if let Some(session) = sessions.get_mut(&session_id) {
            if session.revoked_at.is_none() {
                session.revoked_at = Some(Utc::now());
            }
        }

        Ok(())
    }

    async fn revoke_family(&self, user_id: Uuid, family_id: Uuid) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut sessions = self.lock();

        let mut revoked = 0;
        for session in sessions.values_mut() {
            if session.user_id == user_id
                && session.family_id == family_id
                && session.revoked_at.is_none()
            {
                session.revoked_at = Some(now);
                revoked += 1;
            }
        }

        Ok(revoked)
    }
}
