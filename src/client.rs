/// Outbound HTTP client with coordinated token refresh.
///
/// Counterpart to the server routes for consumers of the auth API. Access
/// tokens ride in the Authorization header from an injected
/// `AccessTokenSource`; the refresh token lives in the reqwest cookie jar
/// and never touches application code. When a request comes back 401, at
/// most one refresh is in flight process-wide and every waiter shares its
/// outcome.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

/// Failure of the refresh call itself. Always terminal: a failed refresh is
/// never retried, and never triggers another refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// The server rejected the refresh (401) or throttled it (429).
    Denied,
    Network(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::Denied => write!(f, "refresh rejected by the server"),
            RefreshError::Network(msg) => write!(f, "refresh transport failed: {}", msg),
        }
    }
}

impl std::error::Error for RefreshError {}

#[derive(Debug)]
pub enum ClientError {
    /// Credentials are gone (refresh failed or login rejected); the local
    /// token cell has been cleared and a fresh login is required.
    Unauthenticated,
    Transport(reqwest::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Unauthenticated => write!(f, "not authenticated"),
            ClientError::Transport(e) => write!(f, "request failed: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err)
    }
}

/// Injected accessor for the current access token. Outbound calls read it
/// per request instead of going through any shared global.
pub trait AccessTokenSource: Send + Sync {
    fn current(&self) -> Option<String>;
    fn replace(&self, token: Option<String>);
}

/// Process-local token cell.
#[derive(Default)]
pub struct MemoryTokenCell {
    token: RwLock<Option<String>>,
}

impl MemoryTokenCell {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccessTokenSource for MemoryTokenCell {
    fn current(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// How a refresh is actually performed. Split out so the coordinator can be
/// exercised without a server.
#[async_trait]
pub trait RefreshTransport: Send + Sync + 'static {
    async fn refresh(&self) -> Result<String, RefreshError>;
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
}

/// Posts to the refresh endpoint with the shared cookie jar.
pub struct HttpRefreshTransport {
    http: reqwest::Client,
    refresh_url: String,
}

impl HttpRefreshTransport {
    pub fn new(http: reqwest::Client, refresh_url: String) -> Self {
        Self { http, refresh_url }
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self) -> Result<String, RefreshError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::TOO_MANY_REQUESTS => Err(RefreshError::Denied),
            status if !status.is_success() => {
                Err(RefreshError::Network(format!("unexpected status {}", status)))
            }
            _ => {
                let body: RefreshResponse = response
                    .json()
                    .await
                    .map_err(|e| RefreshError::Network(e.to_string()))?;
                Ok(body.access)
            }
        }
    }
}

type InFlightRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

/// Deduplicates concurrent refresh attempts into a single in-flight call.
///
/// A refresh token is single-use on the server, so two clients racing to
/// spend it would guarantee one loser; the coordinator makes sure one
/// process never races itself. A refresh once begun always runs to
/// completion, since it mutates server state either way.
pub struct RefreshCoordinator {
    transport: Arc<dyn RefreshTransport>,
    in_flight: Mutex<Option<InFlightRefresh>>,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn RefreshTransport>) -> Self {
        Self {
            transport,
            in_flight: Mutex::new(None),
        }
    }

    /// Join the in-flight refresh, or start one if none exists. All waiters
    /// resolve with the same value or the same failure.
    ///
    /// The refresh runs as its own task: it mutates server state, so it is
    /// driven to completion even if every waiter is cancelled.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let in_flight = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let transport = Arc::clone(&self.transport);
                    let task = tokio::spawn(async move { transport.refresh().await });
                    let fut = async move {
                        match task.await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                Err(RefreshError::Network(format!("refresh task failed: {}", e)))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let outcome = in_flight.clone().await;

        // First waiter through clears the slot; a stale clone from a newer
        // attempt is left alone.
        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().map_or(false, |f| f.ptr_eq(&in_flight)) {
            *slot = None;
        }

        outcome
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub roles: Vec<String>,
}

#[derive(Deserialize)]
struct AuthPayload {
    access: String,
    user: UserSummary,
}

/// Authenticated API client.
pub struct AuthClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn AccessTokenSource>,
    coordinator: RefreshCoordinator,
}

impl AuthClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, reqwest::Error> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        let transport =
            HttpRefreshTransport::new(http.clone(), format!("{}/auth/refresh", base_url));
        Ok(Self::with_transport(base_url, tokens, http, Arc::new(transport)))
    }

    pub fn with_transport(
        base_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
        http: reqwest::Client,
        transport: Arc<dyn RefreshTransport>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            tokens,
            coordinator: RefreshCoordinator::new(transport),
        }
    }

    /// Authenticate and store the returned access token. The refresh token
    /// arrives as a cookie and stays in the jar.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<UserSummary, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/login", self.base_url))
            .json(&serde_json::json!({ "identifier": identifier, "secret": secret }))
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }
        let payload: AuthPayload = response.error_for_status()?.json().await?;

        self.tokens.replace(Some(payload.access));
        Ok(payload.user)
    }

    /// End the session, best-effort, and drop local credentials either way.
    pub async fn logout(&self) {
        if let Err(e) = self
            .http
            .post(format!("{}/auth/logout", self.base_url))
            .send()
            .await
        {
            tracing::debug!(error = %e, "Logout request failed");
        }
        self.tokens.replace(None);
    }

    /// Send a request with the current access token. On a 401, run exactly
    /// one coordinated refresh and retry the request once; a second 401 is
    /// returned to the caller as-is, never retried.
    ///
    /// The builder closure is invoked per attempt, so the request can be
    /// replayed without requiring a cloneable body.
    ///
    /// # Errors
    /// * `Unauthenticated` - the refresh itself failed; the token cell has
    ///   been cleared and the caller must log in again
    /// * `Transport` - the network call failed
    pub async fn execute<F>(&self, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut request = build(&self.http);
        if let Some(token) = self.tokens.current() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let access = match self.coordinator.refresh().await {
            Ok(access) => {
                self.tokens.replace(Some(access.clone()));
                access
            }
            Err(e) => {
                tracing::warn!(error = %e, "Refresh failed; clearing credentials");
                self.tokens.replace(None);
                return Err(ClientError::Unauthenticated);
            }
        };

        let retried = build(&self.http).bearer_auth(access).send().await?;
        Ok(retried)
    }
}
