// Authentication module
// Manages token lifecycle, credential persistence and refresh coordination

mod claims;
mod coordinator;
mod credentials;
mod manager;
mod refresh;
mod types;

pub use claims::{expires_at, is_expired};
pub use coordinator::{RefreshCoordinator, RefreshLease, Ticket};
pub use credentials::{
    CredentialStore, MemoryCredentialStore, SqliteCredentialStore, TokenKeys,
    DEFAULT_TOKEN_PREFIX,
};
pub use manager::TokenManager;
pub(crate) use manager::token_preview;
pub use types::{Bearer, RefreshOutcome, SessionState, TokenGrant, TokenPair};
