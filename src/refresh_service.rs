//! Refresh-token exchange against the FolioSim auth endpoint

use crate::error::{ClientError, Result};
use crate::types::{RefreshRequest, RefreshResponse, RefreshedTokens};
use reqwest::{Client, StatusCode};
use std::future::Future;
use tracing::{debug, warn};

/// Exchanges a refresh token for a new access token
///
/// Failures are classified: a rejected/expired refresh token yields
/// [`ClientError::RefreshTokenExpired`] (terminal, forces re-authentication),
/// everything else yields [`ClientError::RefreshTransport`]. The distinction
/// tells callers whether retrying later could ever succeed without new user
/// action.
pub trait RefreshService: Send + Sync + 'static {
    fn refresh(&self, refresh_token: &str) -> impl Future<Output = Result<RefreshedTokens>> + Send;
}

/// HTTP refresh service for a single API endpoint
///
/// Posts the refresh token to `{endpoint}/auth/refresh`.
pub struct RefreshServiceHttp {
    http_client: Client,
    endpoint: String,
}

impl RefreshServiceHttp {
    /// Create a new refresh service
    ///
    /// # Arguments
    /// * `endpoint` - Server endpoint URL, e.g. `https://api.foliosim.io`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    /// Create a refresh service reusing an existing HTTP client
    pub fn with_client(http_client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

impl RefreshService for RefreshServiceHttp {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let url = format!("{}/auth/refresh", self.endpoint);

        let request = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };

        let response = match self.http_client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "Refresh request failed to send");
                return Err(ClientError::RefreshTransport(err.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(
                endpoint = %self.endpoint,
                status = %status,
                error = %error_text,
                "Token refresh rejected"
            );
            return Err(classify_refresh_failure(status, &error_text));
        }

        let parsed: RefreshResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(ClientError::RefreshTransport(format!(
                    "invalid refresh response: {err}"
                )));
            }
        };

        debug!(
            endpoint = %self.endpoint,
            rotated = parsed.refresh_token.is_some(),
            "Access token refreshed"
        );

        Ok(RefreshedTokens {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
        })
    }
}

/// Map a non-2xx refresh response to terminal or transient
///
/// 401/403, or an error body mentioning an invalid/expired/unauthorized
/// credential, means the refresh token itself is no good.
fn classify_refresh_failure(status: StatusCode, body: &str) -> ClientError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ClientError::RefreshTokenExpired(format!("{status}: {body}"));
    }

    let lowered = body.to_ascii_lowercase();
    if ["invalid", "expired", "unauthorized"]
        .iter()
        .any(|needle| lowered.contains(needle))
    {
        return ClientError::RefreshTokenExpired(format!("{status}: {body}"));
    }

    ClientError::RefreshTransport(format!("{status}: {body}"))
}
