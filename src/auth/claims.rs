// Access token claim decoding
//
// Only the `exp` claim is read. The signature is never checked here; the
// server is the authority on whether a token is acceptable.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    /// NumericDate; may carry a fractional part
    exp: Option<f64>,
}

/// Read the expiry of a three-segment signed token
pub fn expires_at(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    // Some issuers pad their segments
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.exp.filter(|exp| exp.is_finite())?;
    Utc.timestamp_opt(exp.floor() as i64, 0).single()
}

/// Whether the token is expired at `now`. Unreadable tokens count as expired.
pub fn is_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    match expires_at(token) {
        Some(exp) => exp <= now,
        None => true,
    }
}

pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, Utc::now())
}

#[cfg(test)]
pub(crate) fn encode_for_test(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"1","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, payload)
}
