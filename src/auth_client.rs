//! Authenticated request interception with refresh-and-retry

use crate::error::{ClientError, Result};
use crate::session::AuthContext;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode, Url};
use std::sync::Arc;
use tracing::{debug, warn};

/// Body of the synthesized response returned when the refresh path breaks
/// down mid-request. Deliberately generic: refresh-service error detail never
/// reaches the original caller.
const AUTH_FAILED_BODY: &str = r#"{"error":"Authentication failed"}"#;

/// Records that a request has already consumed its one refresh-and-retry
/// cycle
///
/// The marker is threaded through the resend path as an explicit value. It
/// belongs to the request instance, is absent on the first send, and is never
/// cleared.
#[derive(Debug, Clone, Copy)]
pub struct RetryMarker;

/// Path-prefix predicate for endpoints that must never carry a session token
///
/// The auth endpoints themselves are excluded by default: running the refresh
/// call through the interceptor would loop when the refresh call itself fails
/// with an auth-like status.
#[derive(Debug, Clone)]
pub struct ExcludedEndpoints {
    prefixes: Vec<String>,
}

impl ExcludedEndpoints {
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether requests to this URL bypass the interceptor entirely
    pub fn matches(&self, url: &Url) -> bool {
        let path = url.path();
        self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}

impl Default for ExcludedEndpoints {
    fn default() -> Self {
        Self::new(["/auth/"])
    }
}

/// HTTP client wrapper that authenticates outgoing requests
///
/// Makes one outgoing request appear authenticated and resilient to a single
/// expiry event: the session token is injected into a request, a 401 response
/// triggers one token refresh and one resend, and a second rejection (or a
/// refresh breakdown) logs the session out. A request never retries more than
/// once.
///
/// Network-level errors are propagated unmodified and never treated as an
/// authentication failure; dropping the returned future abandons any pending
/// refresh or retry without logging out.
pub struct AuthHttpClient<C> {
    http_client: Client,
    context: Arc<C>,
    excluded: ExcludedEndpoints,
}

impl<C: AuthContext> AuthHttpClient<C> {
    /// Create a client with a default HTTP client and excluded endpoints
    pub fn new(context: Arc<C>) -> Self {
        Self::with_client(Client::new(), context)
    }

    /// Create a client reusing an existing `reqwest::Client`
    pub fn with_client(http_client: Client, context: Arc<C>) -> Self {
        Self {
            http_client,
            context,
            excluded: ExcludedEndpoints::default(),
        }
    }

    /// Override the excluded-endpoint predicate
    pub fn with_excluded_endpoints(mut self, excluded: ExcludedEndpoints) -> Self {
        self.excluded = excluded;
        self
    }

    /// Start building a request against the wrapped HTTP client
    pub fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> RequestBuilder {
        self.http_client.request(method, url)
    }

    /// Build and execute a request from a builder
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.execute(builder.build()?).await
    }

    /// Execute a request with authentication, refresh, and single retry
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        if self.excluded.matches(request.url()) {
            debug!(path = %request.url().path(), "Excluded endpoint; sending unmodified");
            return Ok(self.http_client.execute(request).await?);
        }

        // Clone before header injection so a retry starts from a pristine
        // request; the clone is None for streaming bodies.
        let retry_request = request.try_clone();

        match self.context.ensure_valid_token().await {
            Some(token) => insert_bearer(&mut request, &token)?,
            // No usable token: send anonymously rather than blocking the
            // request; some endpoints tolerate it
            None => debug!(path = %request.url().path(), "No valid token; sending anonymously"),
        }

        let response = self.http_client.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(retry_request) = retry_request else {
            warn!("401 on a request with a non-replayable body; logging out");
            self.context.logout().await;
            return Ok(response);
        };

        debug!(path = %retry_request.url().path(), "401 received; refreshing session");
        self.resend(retry_request, RetryMarker).await
    }

    /// The single permitted refresh-and-retry cycle
    ///
    /// `_marker` is the request's spent retry budget: a 401 below this point
    /// logs out instead of refreshing again.
    async fn resend(&self, mut request: Request, _marker: RetryMarker) -> Result<Response> {
        if !self.context.refresh_if_needed().await {
            self.context.logout().await;
            return Ok(synthesize_unauthorized());
        }

        let path = request.url().path().to_string();

        if let Some(token) = self.context.ensure_valid_token().await {
            insert_bearer(&mut request, &token)?;
        }

        let response = self.http_client.execute(request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(path = %path, "Retried request rejected again; logging out");
            self.context.logout().await;
        }
        Ok(response)
    }
}

fn insert_bearer(request: &mut Request, token: &str) -> Result<()> {
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ClientError::InvalidTokenFormat)?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

fn synthesize_unauthorized() -> Response {
    let response = http::Response::builder()
        .status(http::StatusCode::UNAUTHORIZED)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(AUTH_FAILED_BODY.to_string())
        .expect("static response parts are valid");
    Response::from(response)
}
