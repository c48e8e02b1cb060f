// Shared fixtures for integration tests
//
// An axum server standing in for the GoNextAuth API, a credential store that
// counts token writes, and a helper to mint unsigned access tokens.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use gonextauth_client::auth::{CredentialStore, MemoryCredentialStore, TokenManager};
use gonextauth_client::http_client::{build_http_client, ApiClient};
use gonextauth_client::models::User;

pub const ROTATED_REFRESH_TOKEN: &str = "rotated-refresh-token";
pub const INITIAL_REFRESH_TOKEN: &str = "initial-refresh-token";

// ==================================================================================================
// Tokens
// ==================================================================================================

/// Unsigned three-segment token with the given claims
pub fn jwt_with_claims(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

/// Unsigned three-segment token carrying `sub` and `exp`
pub fn jwt(subject: &str, exp: i64) -> String {
    jwt_with_claims(json!({ "sub": subject, "exp": exp }))
}

pub fn token_expiring_in(subject: &str, seconds: i64) -> String {
    jwt(subject, Utc::now().timestamp() + seconds)
}

// ==================================================================================================
// Mock API server
// ==================================================================================================

/// How the mock answers `POST /auth/refresh`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshBehavior {
    /// 200 with a new token pair
    Succeed,
    /// 401, the refresh token is no longer valid
    Reject,
    /// Never answers in time; the client sees a timeout
    Hang,
}

struct MockState {
    behavior: RefreshBehavior,
    delay: Duration,
    fresh_token: String,
    refresh_calls: AtomicUsize,
    data_hits: AtomicUsize,
    seen_tokens: Mutex<Vec<Option<String>>>,
}

/// Mock API. Only the token it hands out on refresh is accepted on `/data`.
pub struct MockAuthServer {
    state: Arc<MockState>,
    url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockAuthServer {
    pub async fn start(behavior: RefreshBehavior, delay: Duration) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let state = Arc::new(MockState {
            behavior,
            delay,
            fresh_token: token_expiring_in("refreshed", 900),
            refresh_calls: AtomicUsize::new(0),
            data_hits: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/auth/refresh", post(handle_refresh))
            .route("/data", get(handle_data))
            .route("/always-401", get(handle_always_unauthorized))
            .route("/forbidden", get(handle_forbidden))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            state,
            url: format!("http://127.0.0.1:{}", port),
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The token the server issues on refresh and accepts on `/data`
    pub fn fresh_token(&self) -> &str {
        &self.state.fresh_token
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn data_hits(&self) -> usize {
        self.state.data_hits.load(Ordering::SeqCst)
    }

    /// Bearer tokens presented to `/data`, in arrival order
    pub fn seen_tokens(&self) -> Vec<Option<String>> {
        self.state
            .seen_tokens
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

impl Drop for MockAuthServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn bearer_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn unauthorized(message: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "success": false,
            "message": message,
            "error": { "code": "UNAUTHORIZED" }
        })),
    )
}

async fn handle_refresh(State(state): State<Arc<MockState>>) -> (StatusCode, Json<Value>) {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(state.delay).await;

    match state.behavior {
        RefreshBehavior::Succeed => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Token refreshed successfully",
                "data": {
                    "access_token": state.fresh_token,
                    "refresh_token": ROTATED_REFRESH_TOKEN,
                    "expires_in": 900
                }
            })),
        ),
        RefreshBehavior::Reject => unauthorized("Invalid or expired refresh token"),
        RefreshBehavior::Hang => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            unauthorized("Too late")
        }
    }
}

async fn handle_data(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    let bearer = bearer_of(&headers);
    state.data_hits.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut seen) = state.seen_tokens.lock() {
        seen.push(bearer.clone());
    }

    if bearer.as_deref() == Some(state.fresh_token.as_str()) {
        (
            StatusCode::OK,
            Json(json!({ "success": true, "message": "ok", "data": { "value": 42 } })),
        )
    } else {
        unauthorized("Token expired")
    }
}

async fn handle_always_unauthorized() -> (StatusCode, Json<Value>) {
    unauthorized("Token revoked")
}

async fn handle_forbidden() -> (StatusCode, Json<Value>) {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "success": false, "message": "Insufficient permissions" })),
    )
}

// ==================================================================================================
// Credential store that counts writes
// ==================================================================================================

#[derive(Default)]
pub struct CountingStore {
    inner: MemoryCredentialStore,
    writes: AtomicUsize,
    refresh_reads_fail: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a pair without counting it as a write
    pub fn seed(&self, access_token: &str, refresh_token: &str) {
        self.inner
            .set_tokens(access_token, refresh_token, 3600)
            .expect("seeding an in-memory store cannot fail");
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every later `get_refresh_token` fail
    pub fn fail_refresh_reads(&self) {
        self.refresh_reads_fail.store(true, Ordering::SeqCst);
    }
}

impl CredentialStore for CountingStore {
    fn get_access_token(&self) -> anyhow::Result<Option<String>> {
        self.inner.get_access_token()
    }

    fn get_refresh_token(&self) -> anyhow::Result<Option<String>> {
        if self.refresh_reads_fail.load(Ordering::SeqCst) {
            anyhow::bail!("disk I/O error");
        }
        self.inner.get_refresh_token()
    }

    fn get_expires_at(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.inner.get_expires_at()
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str, expires_in: u64) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set_tokens(access_token, refresh_token, expires_in)
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.inner.clear()
    }

    fn set_user(&self, user: &User) -> anyhow::Result<()> {
        self.inner.set_user(user)
    }

    fn get_user(&self) -> anyhow::Result<Option<User>> {
        self.inner.get_user()
    }
}

// ==================================================================================================
// Gateway wiring
// ==================================================================================================

pub struct Gateway {
    pub api: Arc<ApiClient>,
    pub tokens: Arc<TokenManager>,
    pub store: Arc<CountingStore>,
}

/// Wire a gateway against `base_url` with the given per-request timeout
pub fn gateway(base_url: &str, store: Arc<CountingStore>, request_timeout: Duration) -> Gateway {
    let client = build_http_client(Duration::from_secs(2), request_timeout)
        .expect("Failed to create HTTP client");
    let tokens = Arc::new(TokenManager::new(store.clone(), client.clone(), base_url));
    let api = Arc::new(ApiClient::with_client(client, tokens.clone()));
    Gateway { api, tokens, store }
}

pub fn user_json(email: &str) -> Value {
    json!({
        "id": 7,
        "email": email,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "is_email_verified": true,
        "is_active": true,
        "auth_provider": "email",
        "last_activity_at": "2026-10-01T12:00:00Z",
        "created_at": "2026-01-01T00:00:00Z"
    })
}
