/// Middleware module
///
/// Request guards for protected routes.

mod require_auth;

pub use require_auth::RequireAuth;
