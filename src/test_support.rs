//! Shared helpers for unit tests

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Build an unsigned JWT with the given `exp` claim
pub(crate) fn make_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"user-1","exp":{exp}}}"#));
    let signature = URL_SAFE_NO_PAD.encode(b"sig");
    format!("{header}.{claims}.{signature}")
}
