//! Error types for the FolioSim client

use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No token found")]
    NoToken,

    #[error("Invalid token format")]
    InvalidTokenFormat,

    #[error("Token expired")]
    TokenExpired,

    /// The refresh token was rejected or is missing. Terminal: the session
    /// cannot recover without the user signing in again.
    #[error("Refresh token expired: {0}")]
    RefreshTokenExpired(String),

    /// The refresh exchange failed for a non-auth reason (network, 5xx,
    /// malformed server response). Retrying later could succeed.
    #[error("Token refresh failed: {0}")]
    RefreshTransport(String),

    #[error("Token storage failed: {0}")]
    Storage(String),
}

impl ClientError {
    /// True for failures that force re-authentication rather than retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientError::RefreshTokenExpired(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
