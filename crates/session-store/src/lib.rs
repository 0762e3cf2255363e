//! Session record persistence for the auth core.
//!
//! This crate owns the persisted [`SessionRecord`] shape and the
//! injected [`SessionStore`] seam. Whether storage survives process
//! restarts is a property of the adapter, not of this crate:
//! [`MemoryStore`] is ephemeral, and [`KvSessionStore`] turns any
//! three-operation key-value backend (keychain, encrypted file, ...)
//! into a durable store.

mod kv;
mod memory;
mod record;
mod traits;

pub use kv::{KvSessionStore, SESSION_RECORD_KEY};
pub use memory::MemoryStore;
pub use record::{AuthMethod, SessionRecord};
pub use traits::{KeyValueStorage, SessionStore};

use thiserror::Error;

/// Error type for session storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend-specific failure (keychain locked, file unwritable, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Persisted bytes do not decode as a session record
    #[error("Corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Refused to persist a record with an empty access token
    #[error("Session record has no access token")]
    MissingAccessToken,
}

/// Result type for session storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
