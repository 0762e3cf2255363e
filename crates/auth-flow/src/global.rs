//! Process-wide session manager handle.
//!
//! Host applications with a single identity install the manager once
//! at startup; components that only need a token reach for
//! [`sessions`] instead of threading the handle through every layer.

use std::sync::{Arc, OnceLock};

use crate::session::SessionLifecycleManager;

static SESSIONS: OnceLock<Arc<SessionLifecycleManager>> = OnceLock::new();

/// Install the process-wide session manager. Returns `false` if one
/// was already installed; the original stays in place.
pub fn install_sessions(manager: Arc<SessionLifecycleManager>) -> bool {
    SESSIONS.set(manager).is_ok()
}

/// The installed session manager, if any.
pub fn sessions() -> Option<Arc<SessionLifecycleManager>> {
    SESSIONS.get().cloned()
}
