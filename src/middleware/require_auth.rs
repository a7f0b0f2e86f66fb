/// Bearer Authentication Middleware
///
/// Extracts the access token from the Authorization header, runs the full
/// identity check (signature, expiry, password-change marker), and injects
/// the resolved `Identity` into request extensions for route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::error::{AppError, AuthError};
use crate::service::AuthService;

/// Guard for routes that require a valid access token.
pub struct RequireAuth {
    auth: web::Data<AuthService>,
}

impl RequireAuth {
    pub fn new(auth: web::Data<AuthService>) -> Self {
        Self { auth }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAuthService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequireAuthService {
            service: Rc::new(service),
            auth: self.auth.clone(),
        }))
    }
}

pub struct RequireAuthService<S> {
    service: Rc<S>,
    auth: web::Data<AuthService>,
}

impl<S, B> Service<ServiceRequest> for RequireAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let auth = self.auth.clone();
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let Some(token) = bearer_token(&req) else {
                tracing::warn!("Missing or malformed Authorization header");
                return Err(AppError::Auth(AuthError::MissingToken).into());
            };

            match auth.identity(&token).await {
                Ok(identity) => {
                    tracing::debug!(user_id = %identity.user_id, "Bearer identity resolved");
                    req.extensions_mut().insert(identity);
                    service.call(req).await
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<String> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}
