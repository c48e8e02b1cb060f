use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{token_preview, Bearer, RefreshOutcome, TokenManager};
use crate::error::{classify_response, error_kind, ClientError, Result};

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers sent with the call
    pub headers: HeaderMap,
    /// Query string parameters
    pub query: Vec<(String, String)>,
    /// Overrides the client-wide request timeout
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// HTTP client for the GoNextAuth API
///
/// Attaches the cached bearer token, and on a 401 refreshes it once (shared
/// with every other request failing at the same time) and retries.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Token lifecycle and refresh coordination
    tokens: Arc<TokenManager>,

    /// API base URL without trailing slash
    base_url: String,
}

impl ApiClient {
    /// Build the HTTP client and the gateway around it
    pub fn new(
        tokens: Arc<TokenManager>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = build_http_client(connect_timeout, request_timeout)?;
        Ok(Self::with_client(client, tokens))
    }

    pub fn with_client(client: Client, tokens: Arc<TokenManager>) -> Self {
        let base_url = tokens.base_url().trim_end_matches('/').to_string();
        Self {
            client,
            tokens,
            base_url,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Issue an authenticated request and parse the response body.
    ///
    /// An expired cached token is refreshed before sending. A 401 triggers one
    /// coordinated refresh and one retry; if the refresh fails the local
    /// credentials are wiped and `AuthenticationExpired` is returned.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let url = self.url(path);

        // Snapshot before reading the token so a refresh finishing in between
        // is detected rather than repeated
        let observed = self.tokens.generation();
        let mut retried = false;

        let mut token = match self.tokens.bearer()? {
            Bearer::Valid(token) => Some(token),
            Bearer::Absent => None,
            Bearer::Expired => {
                tracing::debug!(url = %url, "Access token expired, refreshing before send");
                retried = true;
                Some(self.refreshed_token(observed).await?)
            }
        };

        loop {
            let response = self
                .send(&method, &url, body, options, token.as_deref())
                .await?;
            let status = response.status();

            if status.is_success() {
                return parse_body(response).await;
            }

            if status == StatusCode::UNAUTHORIZED && !retried {
                tracing::warn!(url = %url, "Received 401, refreshing token and retrying...");
                retried = true;
                token = Some(self.refreshed_token(observed).await?);
                continue;
            }

            return Err(error_from_response(response).await);
        }
    }

    async fn refreshed_token(&self, observed: u64) -> Result<String> {
        match self.tokens.refresh(observed).await {
            RefreshOutcome::Refreshed(token) => Ok(token),
            RefreshOutcome::Expired => {
                tracing::warn!("Session expired, credentials cleared");
                Err(ClientError::AuthenticationExpired)
            }
        }
    }

    /// Issue a request without a bearer token and without refresh handling.
    /// A 401 here is an ordinary failure (e.g. wrong password).
    pub async fn public_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<T> {
        let url = self.url(path);
        let response = self.send(&method, &url, body, options, None).await?;

        if response.status().is_success() {
            parse_body(response).await
        } else {
            Err(error_from_response(response).await)
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None, &RequestOptions::default())
            .await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_json(body)?;
        self.request(Method::POST, path, Some(&body), &RequestOptions::default())
            .await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = to_json(body)?;
        self.request(Method::PUT, path, Some(&body), &RequestOptions::default())
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path, None, &RequestOptions::default())
            .await
    }

    /// Send one attempt
    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response> {
        let mut builder = self
            .client
            .request(method.clone(), url)
            .headers(options.headers.clone());

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            method = %method,
            url = %url,
            bearer = token.map(token_preview).unwrap_or("none"),
            "Sending HTTP request"
        );

        match builder.send().await {
            Ok(response) => {
                tracing::debug!(status = %response.status(), "Received HTTP response");
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    error_kind = error_kind(&e),
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                Err(ClientError::from(e))
            }
        }
    }
}

/// Build the pooled reqwest client shared by the gateway and refresh calls
pub fn build_http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> anyhow::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .context("Failed to create HTTP client")
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| ClientError::InvalidRequest(e.to_string()))
}

async fn parse_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    let bytes: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };
    serde_json::from_slice(bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    tracing::error!(
        status = status,
        response_body = %text,
        "HTTP request failed with error response"
    );

    match serde_json::from_str::<Value>(&text) {
        Ok(body) if body.is_object() => classify_response(status, Some(body)),
        _ => ClientError::RequestFailed {
            status,
            message: text,
            body: None,
        },
    }
}
