/// Password Hashing and Verification
///
/// The hashing algorithm is an external capability behind the
/// `PasswordHasher` port; bcrypt is the shipped implementation.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::error::AppError;

pub trait PasswordHasher: Send + Sync {
    /// Hash a plaintext secret for storage.
    ///
    /// # Errors
    /// Returns error if hashing fails
    fn hash(&self, secret: &str) -> Result<String, AppError>;

    /// Verify a plaintext secret against a stored hash.
    ///
    /// # Errors
    /// Returns error if verification itself fails (a mismatch is `Ok(false)`)
    fn verify(&self, secret: &str, hash: &str) -> Result<bool, AppError>;
}

pub struct BcryptHasher;

impl PasswordHasher for BcryptHasher {
    fn hash(&self, secret: &str) -> Result<String, AppError> {
        hash(secret, DEFAULT_COST)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, secret: &str, stored: &str) -> Result<bool, AppError> {
        verify(secret, stored)
            .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let hasher = BcryptHasher;
        let hash = hasher.hash("CorrectHorse9").expect("Failed to hash password");

        assert_ne!(hash, "CorrectHorse9");
        assert!(hash.starts_with("$2"));
    }

    #[test]
    fn test_verify_password() {
        let hasher = BcryptHasher;
        let hash = hasher.hash("CorrectHorse9").expect("Failed to hash password");

        let is_valid = hasher
            .verify("CorrectHorse9", &hash)
            .expect("Failed to verify password");
        assert!(is_valid);
    }

    #[test]
    fn test_verify_wrong_password() {
        let hasher = BcryptHasher;
        let hash = hasher.hash("CorrectHorse9").expect("Failed to hash password");

        let is_valid = hasher
            .verify("WrongHorse9", &hash)
            .expect("Failed to verify password");
        assert!(!is_valid);
    }
}
