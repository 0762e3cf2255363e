//! Storage trait definitions.

use crate::record::SessionRecord;
use crate::StoreResult;

/// Injected storage seam for the single current session.
///
/// Implementations persist at most one record. Only the session
/// lifecycle manager writes through this trait; the sign-in machine
/// hands records off, it never touches storage.
pub trait SessionStore: Send + Sync {
    /// Load the current record, if any.
    fn get_session(&self) -> StoreResult<Option<SessionRecord>>;

    /// Persist the record, replacing any previous one.
    fn save_session(&self, record: &SessionRecord) -> StoreResult<()>;

    /// Remove the record. Idempotent.
    fn clear_session(&self) -> StoreResult<()>;
}

/// Minimal key-value backend for [`KvSessionStore`](crate::KvSessionStore).
///
/// Durable adapters (keychain, encrypted file) implement these three
/// string operations and get session persistence for free.
pub trait KeyValueStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete a value, reporting whether it existed
    fn delete(&self, key: &str) -> StoreResult<bool>;
}
