/// Refresh-token rotation engine.
///
/// One refresh attempt walks: verify signature → fingerprint lookup →
/// reuse / revoked branches → conditional swap → mint new pair. The swap is
/// the only write; everything before it is read-only, so two concurrent
/// attempts with the same token resolve to exactly one winner without any
/// cross-request lock.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::error::{AppError, AuthError, StoreError};
use crate::session::SessionStore;
use crate::token::TokenCodec;
use crate::users::{User, UserDirectory};

/// Outcome of a successful rotation: a fresh pair plus the user it belongs
/// to (handlers reuse it for the response payload).
#[derive(Debug)]
pub struct RotatedTokens {
    pub access: String,
    pub refresh: String,
    pub user: User,
}

pub struct RotationEngine {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
}

impl RotationEngine {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            codec,
            store,
            users,
        }
    }

    /// Redeem a presented refresh token for a new token pair.
    ///
    /// # Errors
    /// * `MalformedToken` / `ExpiredToken` - signature or expiry failure
    /// * `UnknownOrReusedToken` - valid signature but no live session; the
    ///   whole family is revoked before returning (a legitimate client
    ///   never re-presents a rotated-away token)
    /// * `RevokedToken` - the session exists but was revoked; it is not
    ///   resurrected
    /// * `UserGone` - the directory no longer knows the subject
    /// * `RotationRace` - a concurrent rotation of the same token won the
    ///   swap; the family stays alive
    pub async fn execute(&self, presented: &str) -> Result<RotatedTokens, AppError> {
        let claims = self.codec.verify_refresh(presented)?;
        let user_id = claims.user_id()?;
        let family_id = claims.family_id()?;

        let old_hash = TokenCodec::fingerprint(presented);
        let session = match self.store.find_by_hash(&old_hash).await? {
            Some(session) => session,
            None => {
                // The signature checked out but the fingerprint is gone:
                // an already-rotated (or forged) token is being replayed.
                let revoked = self.store.revoke_family(user_id, family_id).await?;
                tracing::warn!(
                    user_id = %user_id,
                    family_id = %family_id,
                    revoked_sessions = revoked,
                    "Replayed or unknown refresh token; session family revoked"
                );
                return Err(AppError::Auth(AuthError::UnknownOrReusedToken));
            }
        };

        if session.is_revoked() {
            tracing::warn!(
                user_id = %user_id,
                session_id = %session.id,
                "Refresh attempted on a revoked session"
            );
            return Err(AppError::Auth(AuthError::RevokedToken));
        }

        let user = self
            .users
            .find_by_id(session.user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::UserGone))?;

        let new_refresh = self.codec.issue_refresh(user.id, family_id)?;
        let new_hash = TokenCodec::fingerprint(&new_refresh);
        let new_expiry = Utc::now() + Duration::seconds(self.codec.refresh_token_expiry());

        match self
            .store
            .rotate(session.id, &old_hash, &new_hash, new_expiry)
            .await
        {
            Ok(rotated) => {
                let access = self.codec.issue_access(&user)?;
                tracing::info!(
                    user_id = %user.id,
                    session_id = %rotated.id,
                    "Refresh token rotated"
                );
                Ok(RotatedTokens {
                    access,
                    refresh: new_refresh,
                    user,
                })
            }
            Err(StoreError::Conflict) => {
                // Lost the swap to a concurrent rotation. Same-client race,
                // not a replay of an already-succeeded rotation: the family
                // is left alone.
                tracing::warn!(
                    user_id = %user.id,
                    session_id = %session.id,
                    "Concurrent refresh lost the rotation race"
                );
                Err(AppError::Auth(AuthError::RotationRace))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::JwtSettings;
    use crate::session::{InMemorySessionStore, NewSession, SessionMeta};
    use crate::users::InMemoryUserDirectory;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn test_settings() -> JwtSettings {
        JwtSettings {
            access_secret: "access-secret-key-at-least-32-chars!!".to_string(),
            refresh_secret: "refresh-secret-key-at-least-32-chars!".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 3600,
            issuer: "test".to_string(),
            refresh_cookie_name: "rt".to_string(),
            cookie_secure: false,
        }
    }

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            password_hash: "$2b$12$irrelevant".to_string(),
            roles: vec!["user".to_string()],
            password_changed_at: Utc::now(),
        }
    }

    struct Harness {
        codec: TokenCodec,
        store: Arc<InMemorySessionStore>,
        engine: RotationEngine,
        user: User,
    }

    fn harness() -> Harness {
        let codec = TokenCodec::new(test_settings());
        let store = Arc::new(InMemorySessionStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let user = test_user();
        users.insert(user.clone());

        let engine = RotationEngine::new(
            codec.clone(),
            store.clone() as Arc<dyn SessionStore>,
            users as Arc<dyn UserDirectory>,
        );

        Harness {
            codec,
            store,
            engine,
            user,
        }
    }

    /// Mint a refresh token and open its session, as a login would.
    async fn open_session(h: &Harness, family_id: Uuid) -> String {
        let token = h.codec.issue_refresh(h.user.id, family_id).unwrap();
        h.store
            .create(NewSession {
                user_id: h.user.id,
                family_id,
                token_hash: TokenCodec::fingerprint(&token),
                expires_at: Utc::now() + Duration::seconds(3600),
                meta: SessionMeta::default(),
            })
            .await
            .expect("session create failed");
        token
    }

    #[tokio::test]
    async fn rotation_chain_replaces_the_token_each_time() {
        let h = harness();
        let family_id = Uuid::new_v4();
        let token_a = open_session(&h, family_id).await;

        let first = h.engine.execute(&token_a).await.expect("rotation failed");
        let second = h
            .engine
            .execute(&first.refresh)
            .await
            .expect("second rotation failed");

        assert_ne!(token_a, first.refresh);
        assert_ne!(first.refresh, second.refresh);
        assert!(!second.access.is_empty());

        // The superseded fingerprints are gone from the store
        let stale = h
            .store
            .find_by_hash(&TokenCodec::fingerprint(&token_a))
            .await
            .unwrap();
        assert!(stale.is_none());
    }

    #[tokio::test]
    async fn replaying_a_rotated_token_revokes_the_whole_family() {
        let h = harness();
        let family_id = Uuid::new_v4();
        let token_a = open_session(&h, family_id).await;

        let b = h.engine.execute(&token_a).await.expect("rotation failed");
        let c = h.engine.execute(&b.refresh).await.expect("rotation failed");

        // Token A already rotated away: presenting it again is theft or a
        // confused client, and either way the family dies.
        let replay = h.engine.execute(&token_a).await;
        assert_eq!(
            replay.unwrap_err(),
            AppError::Auth(AuthError::UnknownOrReusedToken)
        );

        // The latest, otherwise still-valid token is dead too
        let latest = h.engine.execute(&c.refresh).await;
        assert_eq!(latest.unwrap_err(), AppError::Auth(AuthError::RevokedToken));
    }

    #[tokio::test]
    async fn revoked_sessions_are_not_resurrected() {
        let h = harness();
        let family_id = Uuid::new_v4();
        let token = open_session(&h, family_id).await;

        let session = h
            .store
            .find_by_hash(&TokenCodec::fingerprint(&token))
            .await
            .unwrap()
            .unwrap();
        h.store.revoke(session.id).await.unwrap();

        let result = h.engine.execute(&token).await;
        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::RevokedToken));
    }

    #[tokio::test]
    async fn vanished_user_fails_before_the_swap() {
        let h = harness();
        let family_id = Uuid::new_v4();
        // Session for a subject the directory has never heard of
        let ghost_id = Uuid::new_v4();
        let token = h.codec.issue_refresh(ghost_id, family_id).unwrap();
        h.store
            .create(NewSession {
                user_id: ghost_id,
                family_id,
                token_hash: TokenCodec::fingerprint(&token),
                expires_at: Utc::now() + Duration::seconds(3600),
                meta: SessionMeta::default(),
            })
            .await
            .unwrap();

        let result = h.engine.execute(&token).await;
        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::UserGone));

        // No rotation happened: the original fingerprint is still current
        let session = h
            .store
            .find_by_hash(&TokenCodec::fingerprint(&token))
            .await
            .unwrap();
        assert!(session.is_some());
    }

    #[tokio::test]
    async fn garbage_and_foreign_tokens_are_malformed() {
        let h = harness();

        let garbage = h.engine.execute("not-a-token").await;
        assert_eq!(
            garbage.unwrap_err(),
            AppError::Auth(AuthError::MalformedToken)
        );

        // Signed with someone else's secret
        let mut foreign_settings = test_settings();
        foreign_settings.refresh_secret = "a-completely-different-32-char-key!!!".to_string();
        let foreign = TokenCodec::new(foreign_settings)
            .issue_refresh(h.user.id, Uuid::new_v4())
            .unwrap();

        let result = h.engine.execute(&foreign).await;
        assert_eq!(
            result.unwrap_err(),
            AppError::Auth(AuthError::MalformedToken)
        );
    }

    #[tokio::test]
    async fn expired_refresh_token_is_terminal() {
        let h = harness();
        let mut expired_settings = test_settings();
        expired_settings.refresh_token_expiry = -120;
        let expired = TokenCodec::new(expired_settings)
            .issue_refresh(h.user.id, Uuid::new_v4())
            .unwrap();

        let result = h.engine.execute(&expired).await;
        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::ExpiredToken));
    }

    #[tokio::test]
    async fn valid_signature_without_a_session_still_trips_reuse_detection() {
        let h = harness();
        // Correctly signed token that never had a session (e.g. minted
        // before a store wipe). Nothing to revoke, same terminal outcome.
        let orphan = h.codec.issue_refresh(h.user.id, Uuid::new_v4()).unwrap();

        let result = h.engine.execute(&orphan).await;
        assert_eq!(
            result.unwrap_err(),
            AppError::Auth(AuthError::UnknownOrReusedToken)
        );
    }

    /// Store double that lets a competing rotation commit between this
    /// caller's lookup and its swap, reproducing the lost-race interleaving
    /// deterministically.
    struct PreemptedStore {
        inner: Arc<InMemorySessionStore>,
        competing_hash: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SessionStore for PreemptedStore {
        async fn create(&self, new: NewSession) -> Result<crate::session::Session, StoreError> {
            self.inner.create(new).await
        }

        async fn find_by_hash(
            &self,
            token_hash: &str,
        ) -> Result<Option<crate::session::Session>, StoreError> {
            self.inner.find_by_hash(token_hash).await
        }

        async fn rotate(
            &self,
            session_id: Uuid,
            expected_hash: &str,
            new_hash: &str,
            new_expiry: DateTime<Utc>,
        ) -> Result<crate::session::Session, StoreError> {
            let competing = self
                .competing_hash
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .take();
            if let Some(competing) = competing {
                self.inner
                    .rotate(session_id, expected_hash, &competing, new_expiry)
                    .await
                    .expect("competing rotation failed");
            }
            self.inner
                .rotate(session_id, expected_hash, new_hash, new_expiry)
                .await
        }

        async fn revoke(&self, session_id: Uuid) -> Result<(), StoreError> {
            self.inner.revoke(session_id).await
        }

        async fn revoke_family(
            &self,
            user_id: Uuid,
            family_id: Uuid,
        ) -> Result<u64, StoreError> {
            self.inner.revoke_family(user_id, family_id).await
        }
    }

    #[tokio::test]
    async fn losing_the_rotation_race_is_not_treated_as_reuse() {
        let codec = TokenCodec::new(test_settings());
        let inner = Arc::new(InMemorySessionStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let user = test_user();
        users.insert(user.clone());

        let family_id = Uuid::new_v4();
        let token = codec.issue_refresh(user.id, family_id).unwrap();
        inner
            .create(NewSession {
                user_id: user.id,
                family_id,
                token_hash: TokenCodec::fingerprint(&token),
                expires_at: Utc::now() + Duration::seconds(3600),
                meta: SessionMeta::default(),
            })
            .await
            .unwrap();

        let store = Arc::new(PreemptedStore {
            inner: inner.clone(),
            competing_hash: Mutex::new(Some("winner-hash".to_string())),
        });
        let engine = RotationEngine::new(
            codec,
            store as Arc<dyn SessionStore>,
            users as Arc<dyn UserDirectory>,
        );

        let result = engine.execute(&token).await;
        assert_eq!(result.unwrap_err(), AppError::Auth(AuthError::RotationRace));

        // The winner's session survives, un-revoked: a race is not theft
        let winner = inner
            .find_by_hash("winner-hash")
            .await
            .unwrap()
            .expect("winner session vanished");
        assert!(!winner.is_revoked());
    }
}
