// Credential persistence
//
// Tokens and the signed-in user live in a flat key-value space. Keys carry a
// configurable prefix so several deployments can share one database.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::types::TokenPair;
use crate::models::User;

pub const DEFAULT_TOKEN_PREFIX: &str = "GoNextAuth";

/// Persistence for access token, refresh token, expiry and user profile
pub trait CredentialStore: Send + Sync {
    fn get_access_token(&self) -> Result<Option<String>>;

    fn get_refresh_token(&self) -> Result<Option<String>>;

    fn get_expires_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Replace the stored pair. Writing the same pair twice leaves one copy.
    fn set_tokens(&self, access_token: &str, refresh_token: &str, expires_in: u64) -> Result<()>;

    /// Remove tokens and user
    fn clear(&self) -> Result<()>;

    fn set_user(&self, user: &User) -> Result<()>;

    fn get_user(&self) -> Result<Option<User>>;

    fn get_tokens(&self) -> Result<Option<TokenPair>> {
        let (Some(access_token), Some(refresh_token)) =
            (self.get_access_token()?, self.get_refresh_token()?)
        else {
            return Ok(None);
        };
        let expires_at = self.get_expires_at()?.unwrap_or_else(Utc::now);
        Ok(Some(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        }))
    }
}

/// Key names for one prefix
#[derive(Debug, Clone)]
pub struct TokenKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: String,
    pub user: String,
}

impl TokenKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            access_token: format!("{}_access_token", prefix),
            refresh_token: format!("{}_refresh_token", prefix),
            expires_at: format!("{}_expires_at", prefix),
            user: format!("{}_user", prefix),
        }
    }

    fn all(&self) -> [&str; 4] {
        [
            &self.access_token,
            &self.refresh_token,
            &self.expires_at,
            &self.user,
        ]
    }
}

impl Default for TokenKeys {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_PREFIX)
    }
}

fn expiry_from_now(expires_in: u64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in.min(u32::MAX as u64) as i64)
}

/// Parse datetime from RFC 3339, tolerating a `Z` suffix
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse datetime: {}", s))
}

fn parse_user(raw: &str) -> Option<User> {
    match serde_json::from_str(raw) {
        Ok(user) => Some(user),
        Err(e) => {
            tracing::warn!("Discarding unreadable stored user: {}", e);
            None
        }
    }
}

/// In-process store, used by tests and one-shot commands
#[derive(Default)]
pub struct MemoryCredentialStore {
    keys: TokenKeys,
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        Ok(values.get(key).cloned())
    }

    fn with_values<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))?;
        Ok(f(&mut values))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_access_token(&self) -> Result<Option<String>> {
        self.get(&self.keys.access_token)
    }

    fn get_refresh_token(&self) -> Result<Option<String>> {
        self.get(&self.keys.refresh_token)
    }

    fn get_expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get(&self.keys.expires_at)?
            .and_then(|s| parse_datetime(&s).ok()))
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str, expires_in: u64) -> Result<()> {
        let expires_at = expiry_from_now(expires_in).to_rfc3339();
        self.with_values(|values| {
            values.insert(self.keys.access_token.clone(), access_token.to_string());
            values.insert(self.keys.refresh_token.clone(), refresh_token.to_string());
            values.insert(self.keys.expires_at.clone(), expires_at);
        })
    }

    fn clear(&self) -> Result<()> {
        self.with_values(|values| {
            for key in self.keys.all() {
                values.remove(key);
            }
        })
    }

    fn set_user(&self, user: &User) -> Result<()> {
        let json = serde_json::to_string(user).context("Failed to serialize user")?;
        self.with_values(|values| {
            values.insert(self.keys.user.clone(), json);
        })
    }

    fn get_user(&self) -> Result<Option<User>> {
        let Some(raw) = self.get(&self.keys.user)? else {
            return Ok(None);
        };
        let user = parse_user(&raw);
        if user.is_none() {
            self.with_values(|values| {
                values.remove(&self.keys.user);
            })?;
        }
        Ok(user)
    }
}

/// SQLite-backed store using an `auth_kv` table
pub struct SqliteCredentialStore {
    keys: TokenKeys,
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCredentialStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path, prefix: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credentials directory: {}", parent.display())
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        tracing::debug!("Opened credential store at {}", path.display());
        Self::from_connection(conn, prefix)
    }

    pub fn open_in_memory(prefix: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn, prefix)
    }

    fn from_connection(conn: rusqlite::Connection, prefix: &str) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            keys: TokenKeys::new(prefix),
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Credential store lock poisoned"))
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let result = conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
            row.get(0)
        });

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {} from SQLite", key)),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM auth_kv WHERE key = ?", [key])
            .with_context(|| format!("Failed to delete {} from SQLite", key))?;
        Ok(())
    }
}

const UPSERT: &str = "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";

impl CredentialStore for SqliteCredentialStore {
    fn get_access_token(&self) -> Result<Option<String>> {
        self.get(&self.keys.access_token)
    }

    fn get_refresh_token(&self) -> Result<Option<String>> {
        self.get(&self.keys.refresh_token)
    }

    fn get_expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get(&self.keys.expires_at)?
            .and_then(|s| parse_datetime(&s).ok()))
    }

    fn set_tokens(&self, access_token: &str, refresh_token: &str, expires_in: u64) -> Result<()> {
        let expires_at = expiry_from_now(expires_in).to_rfc3339();
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(UPSERT, [self.keys.access_token.as_str(), access_token])?;
        tx.execute(UPSERT, [self.keys.refresh_token.as_str(), refresh_token])?;
        tx.execute(UPSERT, [self.keys.expires_at.as_str(), expires_at.as_str()])?;
        tx.commit().context("Failed to store tokens in SQLite")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for key in self.keys.all() {
            tx.execute("DELETE FROM auth_kv WHERE key = ?", [key])?;
        }
        tx.commit().context("Failed to clear credentials in SQLite")?;
        Ok(())
    }

    fn set_user(&self, user: &User) -> Result<()> {
        let json = serde_json::to_string(user).context("Failed to serialize user")?;
        self.conn()?
            .execute(UPSERT, [self.keys.user.as_str(), json.as_str()])
            .context("Failed to store user in SQLite")?;
        Ok(())
    }

    fn get_user(&self) -> Result<Option<User>> {
        let Some(raw) = self.get(&self.keys.user)? else {
            return Ok(None);
        };
        let user = parse_user(&raw);
        if user.is_none() {
            self.delete(&self.keys.user)?;
        }
        Ok(user)
    }
}
