//! Type definitions for session management

use serde::{Deserialize, Serialize};

/// Refresh the access token once it has this many seconds (or fewer) left.
///
/// Renewing inside the buffer avoids a guaranteed-401 round trip on the next
/// real request.
pub const DEFAULT_REFRESH_BEFORE_EXPIRY_SECS: u64 = 300;

/// Default check interval for the background auto-refresh task.
pub const DEFAULT_REFRESH_CHECK_INTERVAL_SECS: u64 = 30;

/// Validation reason when the store holds no access token.
pub const REASON_NO_TOKEN: &str = "No token found";

/// Validation reason when the stored token is not a decodable three-segment
/// JWT with an `exp` claim.
pub const REASON_INVALID_FORMAT: &str = "Invalid token format";

/// Result of validating the stored access token
///
/// Invariants: a well-formed, unexpired token yields `is_valid == true` and
/// `reason == None`; `seconds_remaining` is 0 whenever the token is expired,
/// absent, or malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenValidation {
    pub is_valid: bool,
    pub is_expired: bool,
    pub seconds_remaining: u64,
    pub reason: Option<&'static str>,
}

impl TokenValidation {
    pub(crate) fn missing() -> Self {
        Self {
            is_valid: false,
            is_expired: false,
            seconds_remaining: 0,
            reason: Some(REASON_NO_TOKEN),
        }
    }

    pub(crate) fn malformed() -> Self {
        Self {
            is_valid: false,
            is_expired: false,
            seconds_remaining: 0,
            reason: Some(REASON_INVALID_FORMAT),
        }
    }

    pub(crate) fn from_expiry(exp: i64, now: i64) -> Self {
        let seconds_remaining = exp.saturating_sub(now).max(0) as u64;
        let is_expired = exp - now <= 0;
        Self {
            is_valid: !is_expired,
            is_expired,
            seconds_remaining,
            reason: None,
        }
    }
}

/// Tokens issued by a successful refresh exchange
///
/// `refresh_token` is `None` when the server did not rotate it; the manager
/// keeps using the previous one in that case (refresh tokens may be single-use
/// or multi-use depending on server policy).
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Wire request for `POST {endpoint}/auth/refresh`
#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Wire response from the refresh endpoint
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Configuration for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Refresh threshold in seconds (refresh when this many seconds or fewer
    /// remain before expiry)
    pub refresh_before_expiry_secs: u64,

    /// Auto-refresh check interval in seconds
    pub refresh_check_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_before_expiry_secs: DEFAULT_REFRESH_BEFORE_EXPIRY_SECS,
            refresh_check_interval_secs: DEFAULT_REFRESH_CHECK_INTERVAL_SECS,
        }
    }
}

/// Current Unix time in seconds
pub(crate) fn now_unix_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_from_expiry_clamps_remaining_to_zero() {
        let past = TokenValidation::from_expiry(1000, 2000);
        assert!(past.is_expired);
        assert!(!past.is_valid);
        assert_eq!(past.seconds_remaining, 0);
        assert_eq!(past.reason, None);
    }

    #[test]
    fn validation_expired_exactly_at_expiry() {
        let at_expiry = TokenValidation::from_expiry(2000, 2000);
        assert!(at_expiry.is_expired);
        assert_eq!(at_expiry.seconds_remaining, 0);
    }

    #[test]
    fn validation_valid_before_expiry() {
        let valid = TokenValidation::from_expiry(2000, 1400);
        assert!(valid.is_valid);
        assert!(!valid.is_expired);
        assert_eq!(valid.seconds_remaining, 600);
        assert_eq!(valid.reason, None);
    }

    #[test]
    fn refresh_response_tolerates_missing_refresh_token() {
        let body = r#"{"access_token":"tok"}"#;
        let parsed: RefreshResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.access_token, "tok");
        assert!(parsed.refresh_token.is_none());
    }
}
