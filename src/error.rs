/// Error Handling Module
///
/// Unified error handling for the token/session core:
/// 1. Domain-specific error types (authentication, session store)
/// 2. A single `AppError` used for control flow
/// 3. HTTP response mapping via `ResponseError`
/// 4. Structured error logging that keeps detail the HTTP surface hides

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// Terminal authentication failures.
///
/// Every variant maps to the same `401 Unauthorized` response body: a caller
/// probing the refresh endpoint must not be able to tell reuse detection
/// apart from ordinary expiry. The distinction survives only in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    InvalidCredentials,
    MissingToken,
    MalformedToken,
    ExpiredToken,
    /// The presented refresh token carried a valid signature but no live
    /// session. Either it was already rotated away or it was stolen; the
    /// whole family is revoked before this is returned.
    UnknownOrReusedToken,
    RevokedToken,
    /// Lost the compare-and-swap against a concurrent rotation of the same
    /// token. Not a theft signal; the family stays alive.
    RotationRace,
    UserGone,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "invalid credentials"),
            AuthError::MissingToken => write!(f, "missing authentication token"),
            AuthError::MalformedToken => write!(f, "malformed token"),
            AuthError::ExpiredToken => write!(f, "token has expired"),
            AuthError::UnknownOrReusedToken => write!(f, "unknown or reused refresh token"),
            AuthError::RevokedToken => write!(f, "refresh token has been revoked"),
            AuthError::RotationRace => write!(f, "refresh token rotation lost a concurrent race"),
            AuthError::UserGone => write!(f, "user no longer exists"),
        }
    }
}

impl StdError for AuthError {}

/// Session store failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A token fingerprint already exists. Astronomically unlikely given
    /// per-token randomness, but surfaced rather than ignored.
    DuplicateToken,
    /// The conditional write found a different hash (or a revoked session)
    /// than the caller expected. Exactly one concurrent rotation wins.
    Conflict,
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateToken => write!(f, "token fingerprint already stored"),
            StoreError::Conflict => write!(f, "session was concurrently modified"),
            StoreError::Unavailable(msg) => write!(f, "session store unavailable: {}", msg),
        }
    }
}

impl StdError for StoreError {}

/// Central error type that all application errors map to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    Auth(AuthError),
    Store(StoreError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Store(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // 23505: unique constraint violation
            if db.code().as_deref() == Some("23505") {
                return StoreError::DuplicateToken;
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            // All authentication failures share one body. No variant detail
            // leaves the process boundary.
            AppError::Auth(_) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED".to_string(),
                "Unauthorized".to_string(),
            ),

            AppError::Store(StoreError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE".to_string(),
                "Service temporarily unavailable".to_string(),
            ),

            // Conflict and DuplicateToken are mapped to auth outcomes before
            // they reach the HTTP layer; one slipping through is a bug.
            AppError::Store(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR".to_string(),
                "Internal server error".to_string(),
            ),
        };

        let error_response =
            ErrorResponse::new(request_id.to_string(), message, code, status.as_u16());

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::Auth(e) => {
                tracing::warn!(
                    request_id = request_id,
                    reason = ?e,
                    "Authentication rejected"
                );
            }
            AppError::Store(e) => {
                tracing::error!(
                    request_id = request_id,
                    error = %e,
                    "Session store error"
                );
            }
            AppError::Internal(msg) => {
                tracing::error!(
                    request_id = request_id,
                    error = %msg,
                    "Internal error"
                );
            }
        }
    }
}

/// Implement ResponseError for Actix-web integration
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
