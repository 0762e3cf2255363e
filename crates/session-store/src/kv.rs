//! Session persistence over a key-value backend.

use tracing::warn;

use crate::record::SessionRecord;
use crate::traits::{KeyValueStorage, SessionStore};
use crate::StoreResult;

/// Storage key holding the JSON-encoded current session.
pub const SESSION_RECORD_KEY: &str = "auth.session.current";

/// [`SessionStore`] that keeps the record as one JSON value in any
/// [`KeyValueStorage`] backend.
pub struct KvSessionStore {
    backend: Box<dyn KeyValueStorage>,
}

impl KvSessionStore {
    pub fn new(backend: Box<dyn KeyValueStorage>) -> Self {
        Self { backend }
    }
}

impl SessionStore for KvSessionStore {
    /// Load the record. A value that no longer decodes is deleted and
    /// treated as no session rather than poisoning every later load.
    fn get_session(&self) -> StoreResult<Option<SessionRecord>> {
        let Some(raw) = self.backend.get(SESSION_RECORD_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "Stored session record is corrupt, clearing it");
                self.backend.delete(SESSION_RECORD_KEY)?;
                Ok(None)
            }
        }
    }

    fn save_session(&self, record: &SessionRecord) -> StoreResult<()> {
        record.validate()?;
        let encoded = serde_json::to_string(record)?;
        self.backend.set(SESSION_RECORD_KEY, &encoded)
    }

    fn clear_session(&self) -> StoreResult<()> {
        self.backend.delete(SESSION_RECORD_KEY)?;
        Ok(())
    }
}
