/// Authentication service
///
/// The user-facing operations: login, refresh, logout, and the stateless
/// identity check. Composes the token codec, session store, and rotation
/// engine with the external user directory and password hasher.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{AppError, AuthError, StoreError};
use crate::password::PasswordHasher;
use crate::rotation::{RotatedTokens, RotationEngine};
use crate::session::{NewSession, Session, SessionMeta, SessionStore};
use crate::token::TokenCodec;
use crate::users::{User, UserDirectory};

/// Resolved identity of a bearer, as injected into protected requests.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

/// Token pair minted at login.
#[derive(Debug)]
pub struct IssuedTokens {
    pub access: String,
    pub refresh: String,
    pub user: User,
}

pub struct AuthService {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    hasher: Arc<dyn PasswordHasher>,
    rotation: RotationEngine,
}

impl AuthService {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserDirectory>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        let rotation = RotationEngine::new(codec.clone(), Arc::clone(&store), Arc::clone(&users));
        Self {
            codec,
            store,
            users,
            hasher,
            rotation,
        }
    }

    /// Refresh-token lifetime in seconds, for the cookie Max-Age.
    pub fn refresh_ttl(&self) -> i64 {
        self.codec.refresh_token_expiry()
    }

    /// Authenticate with identifier and secret, open a new session family,
    /// and issue both tokens.
    ///
    /// # Security Notes
    /// - Uses the same error whether the identifier is unknown or the
    ///   secret mismatches, preventing account enumeration
    ///
    /// # Errors
    /// * `InvalidCredentials` - unknown identifier or wrong secret
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        meta: SessionMeta,
    ) -> Result<IssuedTokens, AppError> {
        let email = identifier.trim().to_lowercase();

        let user = match self.users.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                tracing::warn!("Login attempt for unknown identifier");
                return Err(AppError::Auth(AuthError::InvalidCredentials));
            }
        };

        if !self.hasher.verify(secret, &user.password_hash)? {
            tracing::warn!(user_id = %user.id, "Login attempt with wrong secret");
            return Err(AppError::Auth(AuthError::InvalidCredentials));
        }

        let family_id = Uuid::new_v4();
        let access = self.codec.issue_access(&user)?;
        let (refresh, session) = self.open_session(&user, family_id, meta).await?;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.id,
            "User logged in"
        );

        Ok(IssuedTokens {
            access,
            refresh,
            user,
        })
    }

    /// Mint a refresh token and persist its session. A fingerprint
    /// collision gets one re-mint with a fresh jti before giving up.
    async fn open_session(
        &self,
        user: &User,
        family_id: Uuid,
        meta: SessionMeta,
    ) -> Result<(String, Session), AppError> {
        let mut reminted = false;
        loop {
            let refresh = self.codec.issue_refresh(user.id, family_id)?;
            let new = NewSession {
                user_id: user.id,
                family_id,
                token_hash: TokenCodec::fingerprint(&refresh),
                expires_at: Utc::now() + Duration::seconds(self.codec.refresh_token_expiry()),
                meta: meta.clone(),
            };

            match self.store.create(new).await {
                Ok(session) => return Ok((refresh, session)),
                Err(StoreError::DuplicateToken) if !reminted => {
                    tracing::warn!(user_id = %user.id, "Refresh fingerprint collision, reminting");
                    reminted = true;
                }
                Err(StoreError::DuplicateToken) => {
                    return Err(AppError::Internal(
                        "refresh token fingerprint collided twice".to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Redeem a refresh token for a new pair. See `RotationEngine::execute`
    /// for the terminal states.
    pub async fn refresh(&self, presented: &str) -> Result<RotatedTokens, AppError> {
        self.rotation.execute(presented).await
    }

    /// Revoke the session behind a presented refresh token, best-effort.
    ///
    /// Logout always succeeds from the caller's perspective: a missing or
    /// unrecognized token and store failures are logged and swallowed.
    pub async fn logout(&self, presented: Option<&str>) {
        let Some(token) = presented else {
            return;
        };

        let hash = TokenCodec::fingerprint(token);
        match self.store.find_by_hash(&hash).await {
            Ok(Some(session)) => match self.store.revoke(session.id).await {
                Ok(()) => {
                    tracing::info!(
                        user_id = %session.user_id,
                        session_id = %session.id,
                        "Session revoked on logout"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Logout revocation failed");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Logout session lookup failed");
            }
        }
    }

    /// Stateless identity check for an access token.
    ///
    /// Verifies signature and expiry, then compares the embedded
    /// password-change marker against the user's current one: a password
    /// change invalidates every access token minted before it, with no
    /// revocation list involved.
    ///
    /// # Errors
    /// * `MalformedToken` / `ExpiredToken` - signature or expiry failure,
    ///   or a marker predating the current password change
    /// * `UserGone` - subject no longer in the directory
    pub async fn identity(&self, access_token: &str) -> Result<Identity, AppError> {
        let claims = self.codec.verify_access(access_token)?;
        let user_id = claims.user_id()?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::UserGone))?;

        if user.password_changed_at.timestamp_millis() > claims.pca {
            tracing::warn!(user_id = %user.id, "Access token predates password change");
            return Err(AppError::Auth(AuthError::ExpiredToken));
        }

        Ok(Identity {
            user_id: user.id,
            roles: user.roles,
        })
    }

    /// Fetch the profile behind an already-verified identity.
    pub async fn user_profile(&self, user_id: Uuid) -> Result<User, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::UserGone))
    }
}
