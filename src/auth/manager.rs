use anyhow::Result;
use reqwest::Client;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use super::claims;
use super::coordinator::{RefreshCoordinator, Ticket};
use super::credentials::CredentialStore;
use super::refresh;
use super::types::{Bearer, RefreshOutcome, SessionState, TokenGrant};
use crate::models::AuthResponse;

/// Token manager
/// Owns the credential store handle, the refresh coordinator and the session state
pub struct TokenManager {
    /// Where tokens and the user profile are persisted
    store: Arc<dyn CredentialStore>,

    /// Single-flight guard for refresh calls
    coordinator: RefreshCoordinator,

    /// Current session state, observable by subscribers
    session: watch::Sender<SessionState>,

    /// Serializes sign-in, sign-out and the write-back of a refresh result
    writes: Mutex<()>,

    /// HTTP client for refresh requests
    client: Client,

    /// API base URL, e.g. http://localhost:8080/api/v1
    base_url: String,
}

/// First characters of a token, for logs
pub(crate) fn token_preview(token: &str) -> &str {
    token.get(..8).unwrap_or("")
}

/// Puts the session back where it was if the refresh leader is dropped mid-call
struct RestoreOnCancel<'a> {
    session: &'a watch::Sender<SessionState>,
    previous: SessionState,
    armed: bool,
}

impl RestoreOnCancel<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RestoreOnCancel<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.send_replace(self.previous);
            tracing::debug!("Refresh cancelled, session state restored to {:?}", self.previous);
        }
    }
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, client: Client, base_url: impl Into<String>) -> Self {
        let manager = Self {
            store,
            coordinator: RefreshCoordinator::new(),
            session: watch::Sender::new(SessionState::Unauthenticated),
            writes: Mutex::new(()),
            client,
            base_url: base_url.into(),
        };

        // Persisted credentials only count when the access token is still good
        let initial = match manager.bearer() {
            Ok(Bearer::Valid(_)) => SessionState::Authenticated,
            Ok(_) => SessionState::Unauthenticated,
            Err(e) => {
                tracing::warn!("Failed to read stored credentials: {:#}", e);
                SessionState::Unauthenticated
            }
        };
        manager.session.send_replace(initial);
        tracing::debug!("Initial session state: {:?}", initial);

        manager
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> SessionState {
        *self.session.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.session.send_replace(state);
        if previous != state {
            tracing::debug!("Session state: {:?} -> {:?}", previous, state);
        }
    }

    /// Snapshot to take before sending a request, see [`TokenManager::refresh`]
    pub fn generation(&self) -> u64 {
        self.coordinator.generation()
    }

    /// Inspect the cached access token
    pub fn bearer(&self) -> Result<Bearer> {
        let Some(token) = self.store.get_access_token()? else {
            return Ok(Bearer::Absent);
        };

        if claims::expires_at(&token).is_none() {
            return Ok(Bearer::Absent);
        }
        Ok(if claims::is_expired(&token) {
            Bearer::Expired
        } else {
            Bearer::Valid(token)
        })
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Obtain a fresh access token, sharing one refresh call among all callers.
    ///
    /// `observed` is the generation read before the failing request was sent.
    pub async fn refresh(&self, observed: u64) -> RefreshOutcome {
        loop {
            match self.coordinator.begin(observed) {
                Ticket::Settled(outcome) => return outcome,
                Ticket::Wait(rx) => match rx.await {
                    Ok(outcome) => return outcome,
                    // Leader went away without resolving; try again
                    Err(_) => continue,
                },
                Ticket::Lead(lease) => {
                    let restore = RestoreOnCancel {
                        session: &self.session,
                        previous: self.state(),
                        armed: true,
                    };
                    self.set_state(SessionState::Refreshing);
                    let outcome = self.perform_refresh().await;
                    restore.disarm();
                    let released = lease.resolve(outcome.clone());
                    if released > 0 {
                        tracing::debug!(released, "Released queued requests");
                    }
                    return outcome;
                }
            }
        }
    }

    async fn perform_refresh(&self) -> RefreshOutcome {
        tracing::debug!("Refreshing access token...");

        let refresh_token = match self.store.get_refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!("No refresh token available");
                return self.give_up(None);
            }
            Err(e) => {
                tracing::error!("Failed to read refresh token: {:#}", e);
                return self.give_up(None);
            }
        };

        let grant =
            match refresh::refresh_access_token(&self.client, &self.base_url, &refresh_token).await
            {
                Ok(grant) => grant,
                Err(e) => {
                    tracing::error!("Token refresh failed: {:#}", e);
                    return self.give_up(Some(&refresh_token));
                }
            };

        let _writes = self.lock_writes();
        if let Some(outcome) = self.superseded(Some(&refresh_token)) {
            return outcome;
        }

        if let Err(e) = self.persist(&grant, &refresh_token) {
            tracing::error!("Failed to store refreshed tokens: {:#}", e);
            return self.expire();
        }

        tracing::info!(
            "Token refreshed ({}...), expires in {}s",
            token_preview(&grant.access_token),
            grant.expires_in
        );
        self.set_state(SessionState::Authenticated);
        RefreshOutcome::Refreshed(grant.access_token)
    }

    fn persist(&self, grant: &TokenGrant, previous_refresh: &str) -> Result<()> {
        let refresh_token = grant.refresh_token.as_deref().unwrap_or(previous_refresh);
        self.store
            .set_tokens(&grant.access_token, refresh_token, grant.expires_in)
    }

    /// A sign-in or sign-out that landed while the refresh was running wins
    /// over the refresh result. `used` is the refresh token the leader read.
    /// Caller holds the write lock.
    fn superseded(&self, used: Option<&str>) -> Option<RefreshOutcome> {
        let current = self.store.get_refresh_token().ok()?;
        if current.as_deref() == used {
            return None;
        }

        tracing::info!("Credentials changed during refresh, keeping them");
        match self.store.get_access_token() {
            Ok(Some(access_token)) => {
                self.set_state(SessionState::Authenticated);
                Some(RefreshOutcome::Refreshed(access_token))
            }
            _ => {
                self.set_state(SessionState::Unauthenticated);
                Some(RefreshOutcome::Expired)
            }
        }
    }

    fn give_up(&self, used: Option<&str>) -> RefreshOutcome {
        let _writes = self.lock_writes();
        self.superseded(used).unwrap_or_else(|| self.expire())
    }

    /// Caller holds the write lock
    fn expire(&self) -> RefreshOutcome {
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear credentials: {:#}", e);
        }
        self.set_state(SessionState::Unauthenticated);
        RefreshOutcome::Expired
    }

    /// Store tokens and user from a successful sign-in
    pub fn install(&self, auth: &AuthResponse) -> Result<()> {
        let _writes = self.lock_writes();
        self.store
            .set_tokens(&auth.access_token, &auth.refresh_token, auth.expires_in)?;
        if let Err(e) = self.store.set_user(&auth.user) {
            tracing::warn!("Failed to store user data: {:#}", e);
        }
        self.set_state(SessionState::Authenticated);
        tracing::info!("Signed in as {}", auth.user.email);
        Ok(())
    }

    /// Wipe local credentials
    pub fn clear(&self) -> Result<()> {
        let _writes = self.lock_writes();
        self.store.clear()?;
        self.set_state(SessionState::Unauthenticated);
        Ok(())
    }
}
