// Token refresh call against the remote auth endpoint

use anyhow::{Context, Result};
use reqwest::Client;

use super::types::{RefreshRequest, RefreshResponse, TokenGrant};

/// Refresh endpoint under the API base URL
pub fn refresh_url(base_url: &str) -> String {
    format!("{}/auth/refresh", base_url.trim_end_matches('/'))
}

/// Exchange a refresh token for a new grant. Any non-success response is an error.
pub async fn refresh_access_token(
    client: &Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<TokenGrant> {
    let url = refresh_url(base_url);
    tracing::debug!(url = %url, "Sending refresh request");

    let response = client
        .post(&url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .context("Failed to send refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Token refresh failed: {} - {}", status, error_text);
    }

    let grant = response
        .json::<RefreshResponse>()
        .await
        .context("Failed to parse refresh response")?
        .into_grant();

    if grant.access_token.is_empty() {
        anyhow::bail!("Refresh response does not contain access_token");
    }

    Ok(grant)
}
