/// Authentication Routes
///
/// Login, token refresh, logout, and current-user lookup. The refresh token
/// only ever travels as an HttpOnly cookie scoped to these routes; response
/// bodies carry the access token alone.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ErrorHandler};
use crate::service::{AuthService, Identity};
use crate::session::SessionMeta;
use crate::users::User;

const REFRESH_COOKIE_PATH: &str = "/auth";

/// User login request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            roles: user.roles.clone(),
        }
    }
}

/// Response for login and refresh: the access token plus the user it
/// belongs to. The refresh token goes out as a Set-Cookie, never in the body.
#[derive(Serialize)]
pub struct TokenResponse {
    pub access: String,
    pub user: UserResponse,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
}

fn refresh_cookie(settings: &JwtSettings, value: &str) -> Cookie<'static> {
    Cookie::build(settings.refresh_cookie_name.clone(), value.to_owned())
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(CookieDuration::seconds(settings.refresh_token_expiry))
        .finish()
}

/// Same flags as `refresh_cookie` so browsers actually drop it.
fn clear_refresh_cookie(settings: &JwtSettings) -> Cookie<'static> {
    Cookie::build(settings.refresh_cookie_name.clone(), String::new())
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(SameSite::Strict)
        .path(REFRESH_COOKIE_PATH)
        .max_age(CookieDuration::ZERO)
        .finish()
}

fn session_meta(req: &HttpRequest) -> SessionMeta {
    SessionMeta {
        user_agent: req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        ip: req
            .connection_info()
            .realip_remote_addr()
            .map(str::to_owned),
    }
}

/// POST /auth/login
///
/// Authenticate with identifier and secret. Returns the access token and
/// sets the refresh cookie.
///
/// # Errors
/// - 400: Missing fields (body deserialization)
/// - 401: Invalid credentials (uniform, no enumeration)
/// - 503: Session store unavailable
pub async fn login(
    form: web::Json<LoginRequest>,
    req: HttpRequest,
    service: web::Data<AuthService>,
    settings: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let issued = service
        .login(&form.identifier, &form.secret, session_meta(&req))
        .await?;

    Ok(HttpResponse::Ok()
        .cookie(refresh_cookie(&settings, &issued.refresh))
        .json(TokenResponse {
            access: issued.access,
            user: (&issued.user).into(),
        }))
}

/// POST /auth/refresh
///
/// Rotate the refresh token from the cookie and return a fresh access
/// token. The old refresh token value is spent whether or not this call
/// succeeds in delivering the response.
///
/// # Errors
/// - 401: Invalid, expired, revoked, reused, or raced token; the cookie is
///   cleared on terminal failures, but kept on a lost rotation race so a
///   concurrently won rotation's cookie is not wiped out
/// - 503: Session store unavailable
pub async fn refresh(
    req: HttpRequest,
    service: web::Data<AuthService>,
    settings: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let Some(cookie) = req.cookie(&settings.refresh_cookie_name) else {
        tracing::warn!("Refresh attempted without a refresh cookie");
        return Ok(reject_refresh(
            AppError::Auth(AuthError::MissingToken),
            &settings,
            true,
        ));
    };

    match service.refresh(cookie.value()).await {
        Ok(rotated) => Ok(HttpResponse::Ok()
            .cookie(refresh_cookie(&settings, &rotated.refresh))
            .json(TokenResponse {
                access: rotated.access,
                user: (&rotated.user).into(),
            })),
        Err(e @ AppError::Auth(AuthError::RotationRace)) => {
            Ok(reject_refresh(e, &settings, false))
        }
        Err(e @ AppError::Auth(_)) => Ok(reject_refresh(e, &settings, true)),
        Err(e) => Err(e),
    }
}

fn reject_refresh(err: AppError, settings: &JwtSettings, clear_cookie: bool) -> HttpResponse {
    let request_id = Uuid::new_v4().to_string();
    err.log_error(&request_id);
    let (status, body) = ErrorHandler::error_response(&err, &request_id);

    let mut response = HttpResponse::build(status);
    if clear_cookie {
        response.cookie(clear_refresh_cookie(settings));
    }
    response.json(body)
}

/// POST /auth/logout
///
/// Revoke the presented session, best-effort, and clear the cookie. Always
/// 204: logging out without a cookie, twice, or against a failing store is
/// not an error the client can act on.
pub async fn logout(
    req: HttpRequest,
    service: web::Data<AuthService>,
    settings: web::Data<JwtSettings>,
) -> HttpResponse {
    let cookie = req.cookie(&settings.refresh_cookie_name);
    service
        .logout(cookie.as_ref().map(|c| c.value()))
        .await;

    HttpResponse::NoContent()
        .cookie(clear_refresh_cookie(&settings))
        .finish()
}

/// GET /auth/me
///
/// Current authenticated user. The `Identity` is injected by the
/// `RequireAuth` middleware, which has already run the full check.
///
/// # Errors
/// - 401: Missing or invalid token (handled by middleware)
pub async fn get_current_user(
    identity: web::ReqData<Identity>,
    service: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let user = service.user_profile(identity.user_id).await?;

    Ok(HttpResponse::Ok().json(MeResponse {
        user: (&user).into(),
    }))
}
