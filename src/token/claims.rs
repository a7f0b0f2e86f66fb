/// JWT claim payloads for the two token kinds.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// Claims carried by a short-lived access token.
///
/// `pca` snapshots the user's password-change instant (epoch millis) at
/// issuance time; a later password change invalidates the token even while
/// its signature and expiry are still good.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Role names granted to the subject
    pub roles: Vec<String>,
    /// Password-changed-at marker at issuance (epoch milliseconds)
    pub pca: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
}

impl AccessClaims {
    pub fn new(
        user_id: Uuid,
        roles: Vec<String>,
        pca: i64,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            roles,
            pca,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    /// Extract the user ID from the claims.
    ///
    /// # Errors
    /// Returns `MalformedToken` if the subject is not a valid UUID
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::MalformedToken))
    }
}

/// Claims carried by a refresh token.
///
/// `fam` ties every descendant of one login together; `jti` is fresh random
/// per token so two tokens minted in the same second never share a
/// fingerprint.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    /// Session family ID (UUID string), shared across rotations
    pub fam: String,
    /// Per-token random identifier
    pub jti: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Issuer
    pub iss: String,
}

impl RefreshClaims {
    pub fn new(
        user_id: Uuid,
        family_id: Uuid,
        jti: String,
        expiry_seconds: i64,
        issuer: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id.to_string(),
            fam: family_id.to_string(),
            jti,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
        }
    }

    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::MalformedToken))
    }

    pub fn family_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.fam).map_err(|_| AppError::Auth(AuthError::MalformedToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_claims_carry_subject_and_marker() {
        let user_id = Uuid::new_v4();
        let claims = AccessClaims::new(user_id, vec!["user".into()], 1234, 900, "test".into());

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.pca, 1234);
        assert_eq!(claims.user_id().unwrap(), user_id);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn refresh_claims_expose_family() {
        let user_id = Uuid::new_v4();
        let family_id = Uuid::new_v4();
        let claims =
            RefreshClaims::new(user_id, family_id, "abc123".into(), 3600, "test".into());

        assert_eq!(claims.family_id().unwrap(), family_id);
        assert_eq!(claims.user_id().unwrap(), user_id);
    }

    #[test]
    fn garbled_subject_is_malformed() {
        let mut claims =
            AccessClaims::new(Uuid::new_v4(), vec![], 0, 900, "test".into());
        claims.sub = "not-a-uuid".to_string();

        assert!(claims.user_id().is_err());
    }
}
