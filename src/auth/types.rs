// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens currently held by the credential store
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Token data returned by login and refresh endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Absent on some refresh responses; the previous refresh token stays valid then
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Refresh request body
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh response, either wrapped in the API envelope or bare
#[derive(Deserialize)]
#[serde(untagged)]
pub enum RefreshResponse {
    Enveloped { data: TokenGrant },
    Bare(TokenGrant),
}

impl RefreshResponse {
    pub fn into_grant(self) -> TokenGrant {
        match self {
            RefreshResponse::Enveloped { data } => data,
            RefreshResponse::Bare(grant) => grant,
        }
    }
}

/// Result of one refresh cycle, delivered to every request waiting on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New access token to retry with
    Refreshed(String),
    /// Refresh failed; credentials have been cleared
    Expired,
}

/// Lifecycle of the signed-in session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A valid access token is held
    Authenticated,
    /// A refresh call is in flight and failing requests queue behind it
    Refreshing,
    /// No usable credentials
    Unauthenticated,
}

/// What the gateway should do about the cached access token before sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bearer {
    /// Attach this token
    Valid(String),
    /// Token decoded and its expiry has passed
    Expired,
    /// No token, or one without a readable expiry; send unauthenticated
    Absent,
}
