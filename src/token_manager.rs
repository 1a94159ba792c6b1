//! Token validation, expiry checking, and refresh orchestration

use crate::error::{ClientError, Result};
use crate::refresh_service::RefreshService;
use crate::token_store::TokenStore;
use crate::types::{self, RefreshedTokens, TokenValidation, DEFAULT_REFRESH_BEFORE_EXPIRY_SECS};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
}

/// Decode the `exp` claim from a JWT without verifying its signature
///
/// The server re-validates the signature on every authenticated call (that is
/// what produces the 401s this crate handles); the client only reads the
/// expiry. A token that is not three base64url segments, or whose claims lack
/// `exp`, decodes to `None`.
fn decode_expiry(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let decoded = URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
    let claims: Claims = serde_json::from_slice(&decoded).ok()?;
    Some(claims.exp)
}

/// Manages the stored session tokens
///
/// Owns validation and refresh orchestration over a [`TokenStore`] and a
/// [`RefreshService`]. The manager is the only writer to the store.
pub struct TokenManager<S, R> {
    store: S,
    refresh_service: R,
    refresh_before_expiry_secs: u64,
}

impl<S: TokenStore, R: RefreshService> TokenManager<S, R> {
    /// Create a manager with the default refresh buffer
    pub fn new(store: S, refresh_service: R) -> Self {
        Self {
            store,
            refresh_service,
            refresh_before_expiry_secs: DEFAULT_REFRESH_BEFORE_EXPIRY_SECS,
        }
    }

    /// Override the refresh buffer (seconds before expiry at which
    /// [`needs_refresh`](Self::needs_refresh) starts returning true)
    pub fn with_refresh_before_expiry(mut self, secs: u64) -> Self {
        self.refresh_before_expiry_secs = secs;
        self
    }

    /// Validate the stored access token against the current time
    pub fn validate(&self) -> TokenValidation {
        self.validate_at(types::now_unix_seconds())
    }

    /// Validate the stored access token against an explicit Unix time
    pub fn validate_at(&self, now: i64) -> TokenValidation {
        let Some(token) = self.store.access_token() else {
            return TokenValidation::missing();
        };

        match decode_expiry(&token) {
            Some(exp) => TokenValidation::from_expiry(exp, now),
            None => TokenValidation::malformed(),
        }
    }

    /// Whether the access token should be refreshed now
    ///
    /// True when the token is absent, malformed, or expired, and also while it
    /// is still valid but inside the refresh buffer (boundary inclusive).
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(types::now_unix_seconds())
    }

    /// [`needs_refresh`](Self::needs_refresh) against an explicit Unix time
    pub fn needs_refresh_at(&self, now: i64) -> bool {
        let validation = self.validate_at(now);
        !validation.is_valid || validation.seconds_remaining <= self.refresh_before_expiry_secs
    }

    /// Get the stored access token only if it is currently valid
    ///
    /// Never returns an expired or malformed token.
    pub fn current_valid_token(&self) -> Option<String> {
        if self.validate().is_valid {
            self.store.access_token()
        } else {
            None
        }
    }

    /// Whether a refresh token is held
    pub fn has_refresh_token(&self) -> bool {
        self.store.refresh_token().is_some()
    }

    /// Exchange the stored refresh token for fresh tokens
    ///
    /// On success both tokens are overwritten in the store; when the server
    /// does not rotate the refresh token the previous one is kept. On any
    /// failure the store is cleared before the error propagates, so no caller
    /// can keep using a stale access token after a failed refresh.
    pub async fn refresh(&self) -> Result<RefreshedTokens> {
        let Some(refresh_token) = self.store.refresh_token() else {
            self.store.clear_tokens();
            return Err(ClientError::RefreshTokenExpired(
                "no refresh token stored".to_string(),
            ));
        };

        match self.refresh_service.refresh(&refresh_token).await {
            Ok(refreshed) => {
                let next_refresh = refreshed.refresh_token.clone().unwrap_or(refresh_token);
                self.store
                    .set_tokens(&refreshed.access_token, &next_refresh)?;
                info!("Access token refreshed");
                Ok(RefreshedTokens {
                    access_token: refreshed.access_token,
                    refresh_token: Some(next_refresh),
                })
            }
            Err(err) => {
                self.store.clear_tokens();
                warn!(
                    error = %err,
                    terminal = err.is_terminal(),
                    "Token refresh failed; stored tokens cleared"
                );
                Err(err)
            }
        }
    }

    /// Remove both stored tokens; used on logout
    pub fn clear(&self) {
        self.store.clear_tokens();
    }

    /// Get the token store (for advanced usage)
    pub fn store(&self) -> &S {
        &self.store
    }
}
