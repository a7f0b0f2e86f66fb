/// Token encoding, verification, and fingerprinting.
///
/// Access and refresh tokens are HS256 JWTs signed with separate secrets.
/// Refresh tokens are never stored raw: the session store only ever sees
/// the SHA-256 fingerprint produced here.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::token::{AccessClaims, RefreshClaims};
use crate::users::User;

const JTI_LENGTH: usize = 32;

/// Stateless codec for both token kinds. Verification needs no store access.
#[derive(Clone)]
pub struct TokenCodec {
    settings: JwtSettings,
}

impl TokenCodec {
    pub fn new(settings: JwtSettings) -> Self {
        Self { settings }
    }

    /// Refresh-token lifetime in seconds; session expiry follows it.
    pub fn refresh_token_expiry(&self) -> i64 {
        self.settings.refresh_token_expiry
    }

    pub fn access_token_expiry(&self) -> i64 {
        self.settings.access_token_expiry
    }

    /// Issue an access token for a user.
    ///
    /// Embeds the subject, role set, and the user's current
    /// password-changed-at instant as the validity marker.
    ///
    /// # Errors
    /// Returns error if token generation fails
    pub fn issue_access(&self, user: &User) -> Result<String, AppError> {
        let claims = AccessClaims::new(
            user.id,
            user.roles.clone(),
            user.password_changed_at.timestamp_millis(),
            self.settings.access_token_expiry,
            self.settings.issuer.clone(),
        );

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.access_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Issue a refresh token bound to a session family.
    ///
    /// A fresh random `jti` guarantees distinct fingerprints for tokens
    /// minted in the same instant.
    ///
    /// # Errors
    /// Returns error if token generation fails
    pub fn issue_refresh(&self, user_id: Uuid, family_id: Uuid) -> Result<String, AppError> {
        let claims = RefreshClaims::new(
            user_id,
            family_id,
            generate_jti(),
            self.settings.refresh_token_expiry,
            self.settings.issuer.clone(),
        );

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.refresh_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    /// Validate an access token and extract its claims.
    ///
    /// # Errors
    /// `ExpiredToken` when past expiry, `MalformedToken` for anything else
    /// (bad signature, wrong issuer, garbage input)
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AppError> {
        self.verify(token, self.settings.access_secret.as_bytes())
    }

    /// Validate a refresh token and extract its claims.
    ///
    /// # Errors
    /// `ExpiredToken` when past expiry, `MalformedToken` for anything else
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AppError> {
        self.verify(token, self.settings.refresh_secret.as_bytes())
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, secret: &[u8]) -> Result<T, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.settings.issuer]);

        decode::<T>(token, &DecodingKey::from_secret(secret), &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!("JWT validation error: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        AppError::Auth(AuthError::ExpiredToken)
                    }
                    _ => AppError::Auth(AuthError::MalformedToken),
                }
            })
    }

    /// One-way fingerprint of a token, used as the session store lookup key.
    ///
    /// Never store the raw token.
    pub fn fingerprint(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Random per-token identifier for refresh claims.
fn generate_jti() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JTI_LENGTH)
        .map(char::from)
        .collect()
}
