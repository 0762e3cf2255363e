//! Session lifecycle management.
//!
//! Owns the single current [`SessionRecord`] across process restarts:
//! restore with expiry detection, at-most-one in-flight token refresh,
//! and sign-out. An explicit finite state machine tracks the lifecycle
//! instead of deriving it from storage checks.
//!
//! ## State diagram
//!
//! ```text
//! Empty --Restore--> Restoring --RestoredValid--> Authenticated
//!                        |        \--NeedsRefresh--> Refreshing
//!                        |                               |
//!                        |       RefreshSucceeded -> Authenticated
//!                        |       RefreshFailed ----> Unauthenticated
//!                        +--NoRecord--> Unauthenticated
//!
//! Authenticated --SignOut--> Unauthenticated
//! ```

use chrono::Utc;
use rust_fsm::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use auth_client::{ApiError, AuthApi};
use session_store::{SessionRecord, SessionStore};

use crate::error::{AuthError, AuthResult};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Empty)

    Empty => {
        Restore => Restoring,
        Adopt => Authenticated
    },
    Restoring => {
        RestoredValid => Authenticated,
        NeedsRefresh => Refreshing,
        NoRecord => Unauthenticated
    },
    Refreshing => {
        RefreshSucceeded => Authenticated,
        RefreshRetried => Refreshing,
        RefreshFailed => Unauthenticated
    },
    Authenticated => {
        Restore => Restoring,
        Adopt => Authenticated,
        SignOut => Unauthenticated
    },
    Unauthenticated => {
        Restore => Restoring,
        Adopt => Authenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Lifecycle state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing restored or adopted yet.
    Empty,
    /// Loading and validating the stored record.
    Restoring,
    /// Valid session in hand.
    Authenticated,
    /// Exchanging the refresh token for fresh tokens.
    Refreshing,
    /// No session; sign-in required.
    Unauthenticated,
}

impl LifecycleState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, LifecycleState::Authenticated)
    }
}

impl From<&SessionMachineState> for LifecycleState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Empty => LifecycleState::Empty,
            SessionMachineState::Restoring => LifecycleState::Restoring,
            SessionMachineState::Authenticated => LifecycleState::Authenticated,
            SessionMachineState::Refreshing => LifecycleState::Refreshing,
            SessionMachineState::Unauthenticated => LifecycleState::Unauthenticated,
        }
    }
}

/// Authenticated-or-not, as emitted to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Authenticated {
        user_id: String,
        email: String,
        expires_at: i64,
    },
    Unauthenticated,
}

impl SessionStatus {
    fn from_record(record: &SessionRecord) -> Self {
        SessionStatus::Authenticated {
            user_id: record.user_id.clone(),
            email: record.email.clone(),
            expires_at: record.expires_at,
        }
    }
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<i64>,
    pub state: LifecycleState,
}

/// Configuration for refresh retry behavior.
///
/// `max_attempts` counts the initial try: the default retries a
/// transient failure exactly once within the same call.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub max_attempts: u32,
    /// Initial delay before a retry, milliseconds.
    pub initial_delay_ms: u64,
    /// Cap on the retry delay, milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Delay before retry number `attempt` (0-indexed), doubling up to
    /// the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Callback type for session status notifications.
pub type SessionCallback = Box<dyn Fn(&SessionStatus) + Send + Sync>;

/// Owns the current session record and its staleness handling.
///
/// Only this type writes session storage; the sign-in flow hands
/// records off through [`save`](SessionLifecycleManager::save).
pub struct SessionLifecycleManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn SessionStore>,
    fsm: Mutex<SessionMachine>,
    /// Collapses concurrent restore/refresh callers onto one HTTP
    /// call; see [`ensure_fresh`](Self::ensure_fresh).
    refresh_guard: tokio::sync::Mutex<()>,
    config: RefreshConfig,
    subscribers: Mutex<Vec<SessionCallback>>,
}

impl SessionLifecycleManager {
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(api, store, RefreshConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn SessionStore>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            api,
            store,
            fsm: Mutex::new(SessionMachine::new()),
            refresh_guard: tokio::sync::Mutex::new(()),
            config,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        let fsm = self.fsm.lock().unwrap();
        LifecycleState::from(fsm.state())
    }

    /// Subscribe to authenticated/unauthenticated status changes.
    /// Delivery is insertion order; a panicking subscriber does not
    /// break delivery to the others.
    pub fn subscribe(&self, callback: SessionCallback) {
        self.subscribers.lock().unwrap().push(callback);
    }

    /// Point-in-time view of the session for status reporting.
    pub fn snapshot(&self) -> AuthResult<SessionSnapshot> {
        let state = self.state();
        let record = self.store.get_session()?;
        Ok(match record {
            Some(record) => SessionSnapshot {
                authenticated: state.is_authenticated(),
                user_id: Some(record.user_id),
                email: Some(record.email),
                expires_at: Some(record.expires_at),
                state,
            },
            None => SessionSnapshot {
                authenticated: false,
                user_id: None,
                email: None,
                expires_at: None,
                state,
            },
        })
    }

    /// Restore the session from storage.
    ///
    /// - No record: `Unauthenticated`.
    /// - Record valid: `Authenticated`, no network call.
    /// - Record expired with a refresh token: refresh, persist the new
    ///   token set atomically, `Authenticated`; on fatal failure clear
    ///   storage and report `Unauthenticated`.
    /// - Record expired without a refresh token: clear storage,
    ///   `Unauthenticated`, no network call.
    ///
    /// Refresh failures are never surfaced as errors; only storage
    /// failures are.
    pub async fn restore(&self) -> AuthResult<SessionStatus> {
        let _guard = self.refresh_guard.lock().await;
        match self.ensure_fresh().await? {
            Some(record) => Ok(SessionStatus::from_record(&record)),
            None => Ok(SessionStatus::Unauthenticated),
        }
    }

    /// A valid access token, refreshing first if the stored one has
    /// expired.
    pub async fn access_token(&self) -> AuthResult<String> {
        let _guard = self.refresh_guard.lock().await;
        match self.ensure_fresh().await? {
            Some(record) => Ok(record.access_token),
            None => Err(AuthError::NotSignedIn),
        }
    }

    /// Adopt a freshly minted record from the sign-in flow. Waits for
    /// any in-flight refresh so the adopted record is not overwritten
    /// by a refresh of the one it replaces.
    pub async fn save(&self, record: &SessionRecord) -> AuthResult<()> {
        let _guard = self.refresh_guard.lock().await;
        record.validate()?;
        self.store.save_session(record)?;
        self.transition(&SessionMachineInput::Adopt)?;
        info!(user_id = %record.user_id, method = ?record.auth_method, "Session adopted");
        Ok(())
    }

    /// Best-effort remote revocation, then unconditional local clear.
    pub async fn sign_out(&self) -> AuthResult<()> {
        let _guard = self.refresh_guard.lock().await;

        if let Some(record) = self.store.get_session()? {
            if let Err(e) = self
                .api
                .sign_out(&record.access_token, &record.refresh_token)
                .await
            {
                warn!(error = %e, "Remote sign-out failed, clearing local session anyway");
            }
        }

        self.store.clear_session()?;
        let _ = self.transition(&SessionMachineInput::SignOut);
        self.notify(&SessionStatus::Unauthenticated);
        info!("Signed out");
        Ok(())
    }

    /// Shared restore/refresh path. Caller must hold `refresh_guard`:
    /// the second of two concurrent callers re-reads storage here and
    /// finds the record the first one already refreshed, so only one
    /// HTTP call is ever made.
    async fn ensure_fresh(&self) -> AuthResult<Option<SessionRecord>> {
        self.transition(&SessionMachineInput::Restore)?;

        let Some(record) = self.store.get_session()? else {
            debug!("No stored session");
            self.transition(&SessionMachineInput::NoRecord)?;
            return Ok(None);
        };

        let now = Utc::now().timestamp_millis();
        if !record.is_expired_at(now) {
            self.transition(&SessionMachineInput::RestoredValid)?;
            self.notify(&SessionStatus::from_record(&record));
            return Ok(Some(record));
        }

        if !record.can_refresh() {
            info!(user_id = %record.user_id, "Session expired with no refresh token, clearing");
            self.store.clear_session()?;
            self.transition(&SessionMachineInput::NoRecord)?;
            self.notify(&SessionStatus::Unauthenticated);
            return Ok(None);
        }

        info!(user_id = %record.user_id, "Session expired, refreshing");
        self.transition(&SessionMachineInput::NeedsRefresh)?;

        match self.refresh_with_retry(&record).await {
            Ok(updated) => {
                self.transition(&SessionMachineInput::RefreshSucceeded)?;
                self.notify(&SessionStatus::from_record(&updated));
                Ok(Some(updated))
            }
            Err(e) => {
                // Storage was already cleared on the failure path.
                warn!(error = %e, "Refresh failed, session cleared");
                self.transition(&SessionMachineInput::RefreshFailed)?;
                self.notify(&SessionStatus::Unauthenticated);
                Ok(None)
            }
        }
    }

    /// Refresh the token set, retrying a transient failure once within
    /// this call. On any terminal failure, storage is cleared before
    /// returning: a half-updated record must never survive.
    async fn refresh_with_retry(&self, record: &SessionRecord) -> AuthResult<SessionRecord> {
        let mut last_error: Option<ApiError> = None;

        for attempt in 0..self.config.max_attempts {
            match self.api.refresh_token(&record.refresh_token).await {
                Ok(tokens) => {
                    let mut updated = record.clone();
                    updated.access_token = tokens.access_token;
                    updated.refresh_token = tokens.refresh_token;
                    updated.expires_at =
                        Utc::now().timestamp_millis() + tokens.expires_in * 1000;
                    // One write replaces the whole record.
                    self.store.save_session(&updated)?;
                    info!(user_id = %updated.user_id, "Session refreshed");
                    return Ok(updated);
                }
                Err(e) if e.retryable && attempt + 1 < self.config.max_attempts => {
                    let delay = e
                        .retry_after_ms
                        .map(Duration::from_millis)
                        .unwrap_or_else(|| self.config.delay_for_attempt(attempt));
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient refresh failure, retrying"
                    );
                    let _ = self.transition(&SessionMachineInput::RefreshRetried);
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    warn!(code = ?e.code, "Refresh rejected");
                    self.store.clear_session()?;
                    return Err(e.into());
                }
            }
        }

        self.store.clear_session()?;
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(AuthError::RefreshExhausted(self.config.max_attempts)),
        }
    }

    /// Transition the FSM, logging state changes.
    fn transition(&self, input: &SessionMachineInput) -> AuthResult<LifecycleState> {
        let mut fsm = self.fsm.lock().unwrap();
        let old_state = LifecycleState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = LifecycleState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(old_state = ?old_state, new_state = ?new_state, "Session state transition");
        }

        Ok(new_state)
    }

    fn notify(&self, status: &SessionStatus) {
        let subscribers = self.subscribers.lock().unwrap();
        for callback in subscribers.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                warn!("Session status subscriber panicked");
            }
        }
    }
}
