//! Ephemeral in-process store.

use std::sync::Mutex;

use crate::record::SessionRecord;
use crate::traits::SessionStore;
use crate::StoreResult;

/// In-memory [`SessionStore`], used by tests and deployments that want
/// the session gone on process exit.
#[derive(Default)]
pub struct MemoryStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get_session(&self) -> StoreResult<Option<SessionRecord>> {
        Ok(self.record.lock().unwrap().clone())
    }

    fn save_session(&self, record: &SessionRecord) -> StoreResult<()> {
        record.validate()?;
        *self.record.lock().unwrap() = Some(record.clone());
        Ok(())
    }

    fn clear_session(&self) -> StoreResult<()> {
        *self.record.lock().unwrap() = None;
        Ok(())
    }
}
