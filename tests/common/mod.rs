use std::net::TcpListener;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use authcore::configuration::JwtSettings;
use authcore::password::{BcryptHasher, PasswordHasher};
use authcore::service::AuthService;
use authcore::session::{InMemorySessionStore, SessionStore};
use authcore::startup::run;
use authcore::token::TokenCodec;
use authcore::users::{InMemoryUserDirectory, User, UserDirectory};

pub const TEST_IDENTIFIER: &str = "alice@example.com";
pub const TEST_SECRET: &str = "CorrectHorse9";

pub struct TestApp {
    pub address: String,
    pub users: Arc<InMemoryUserDirectory>,
    pub user_id: Uuid,
}

pub fn test_jwt_settings() -> JwtSettings {
    JwtSettings {
        access_secret: "test-access-secret-at-least-32-chars!".to_string(),
        refresh_secret: "test-refresh-secret-at-least-32-char!".to_string(),
        access_token_expiry: 900,
        refresh_token_expiry: 3600,
        issuer: "authcore-test".to_string(),
        refresh_cookie_name: "rt".to_string(),
        cookie_secure: false,
    }
}

/// Spawn the app on a random port over in-memory backends, seeded with one
/// known user. No external services involved.
pub async fn spawn_app() -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let users = Arc::new(InMemoryUserDirectory::new());
    let user_id = Uuid::new_v4();
    users.insert(User {
        id: user_id,
        email: TEST_IDENTIFIER.to_string(),
        password_hash: BcryptHasher.hash(TEST_SECRET).expect("Failed to hash password"),
        roles: vec!["user".to_string()],
        password_changed_at: Utc::now() - Duration::seconds(10),
    });

    let settings = test_jwt_settings();
    let service = AuthService::new(
        TokenCodec::new(settings.clone()),
        Arc::new(InMemorySessionStore::new()) as Arc<dyn SessionStore>,
        users.clone() as Arc<dyn UserDirectory>,
        Arc::new(BcryptHasher),
    );

    let server = run(listener, service, settings).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        users,
        user_id,
    }
}

/// Pull the refresh-cookie value out of a response's Set-Cookie headers.
pub fn refresh_cookie_value(response: &reqwest::Response) -> String {
    raw_refresh_cookie(response)
        .split(';')
        .next()
        .unwrap_or_default()
        .trim_start_matches("rt=")
        .to_string()
}

/// The full Set-Cookie header for the refresh cookie, attributes included.
pub fn raw_refresh_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("rt="))
        .expect("no refresh cookie in response")
        .to_string()
}
