//! Event-driving shell around the sign-in machine.
//!
//! Owns the current [`SignInState`], executes the [`Effect`]s the pure
//! transition function describes, and feeds results back in as events.
//! At most one asynchronous call is outstanding at a time; UI events
//! that arrive mid-call are queued and applied in arrival order.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use auth_client::{AuthApi, ChallengePurpose, TokenGrant};
use chrono::Utc;
use session_store::{AuthMethod, SessionRecord};

use crate::ceremony::{CeremonyAdapter, CeremonyError};
use crate::machine::{transition, AuthEvent, CredentialOutcome, Effect, FlowConfig, SignInState};
use crate::session::SessionLifecycleManager;

/// Callback type for sign-in state change notifications.
pub type StateCallback = Box<dyn Fn(&SignInState) + Send + Sync>;

/// One sign-in attempt: machine state plus the injected collaborators
/// that execute its effects.
pub struct SignInFlow {
    api: Arc<dyn AuthApi>,
    ceremony: CeremonyAdapter,
    sessions: Arc<SessionLifecycleManager>,
    config: FlowConfig,
    state: Mutex<SignInState>,
    /// Events received while an effect was being executed.
    queue: Mutex<VecDeque<AuthEvent>>,
    /// Serializes event processing; see [`SignInFlow::handle`].
    driving: tokio::sync::Mutex<()>,
    subscribers: Mutex<Vec<StateCallback>>,
}

impl SignInFlow {
    pub fn new(
        api: Arc<dyn AuthApi>,
        ceremony: CeremonyAdapter,
        sessions: Arc<SessionLifecycleManager>,
    ) -> Self {
        Self::with_config(api, ceremony, sessions, FlowConfig::default())
    }

    pub fn with_config(
        api: Arc<dyn AuthApi>,
        ceremony: CeremonyAdapter,
        sessions: Arc<SessionLifecycleManager>,
        config: FlowConfig,
    ) -> Self {
        Self {
            api,
            ceremony,
            sessions,
            config,
            state: Mutex::new(SignInState::initial()),
            queue: Mutex::new(VecDeque::new()),
            driving: tokio::sync::Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current machine state.
    pub fn state(&self) -> SignInState {
        self.state.lock().unwrap().clone()
    }

    /// Subscribe to state changes. Delivery is insertion order; a
    /// panicking subscriber does not break delivery to the others.
    pub fn subscribe(&self, callback: StateCallback) {
        self.subscribers.lock().unwrap().push(callback);
    }

    /// Abandon the current attempt.
    pub async fn reset(&self) {
        self.handle(AuthEvent::Reset).await;
    }

    /// Feed one event into the machine.
    ///
    /// If another event is mid-flight (its effect still executing),
    /// this event is queued and applied once the outstanding call's
    /// result has been folded in, preserving strict arrival order.
    pub async fn handle(&self, event: AuthEvent) {
        self.queue.lock().unwrap().push_back(event);
        self.pump().await;
    }

    /// Drain the event queue, becoming the driver if nobody else is.
    async fn pump(&self) {
        loop {
            let Ok(guard) = self.driving.try_lock() else {
                debug!("Event queued behind outstanding call");
                return;
            };

            loop {
                let queued = self.queue.lock().unwrap().pop_front();
                match queued {
                    Some(next) => self.drive(next).await,
                    None => break,
                }
            }
            drop(guard);

            // A racing caller may have enqueued after the last pop but
            // before the release, and then failed its own try_lock;
            // re-check so that event is not stranded.
            if self.queue.lock().unwrap().is_empty() {
                return;
            }
        }
    }

    /// Apply an event, then execute its effect chain to quiescence.
    async fn drive(&self, event: AuthEvent) {
        let mut event = event;
        loop {
            let step = {
                let state = self.state.lock().unwrap();
                transition(&state, event, &self.config)
            };

            if step.rejected {
                debug!(state = ?step.next, "Event rejected for current state");
                return;
            }

            self.set_state(step.next);
            let Some(effect) = step.effect else { return };
            match self.execute(effect).await {
                Some(result_event) => event = result_event,
                None => return,
            }
        }
    }

    /// Execute one described effect, returning the result event to
    /// feed back, if any.
    async fn execute(&self, effect: Effect) -> Option<AuthEvent> {
        match effect {
            Effect::CheckUser { email } => {
                let result = self.api.check_user(&email).await;
                Some(AuthEvent::UserCheckResult { result })
            }
            Effect::RunPasskey {
                email,
                register,
                display_name,
            } => {
                let outcome = self.run_passkey(&email, register, display_name).await;
                Some(AuthEvent::CredentialResult { outcome })
            }
            Effect::VerifyCode { email, code } => {
                let result = self
                    .api
                    .verify_code(&email, &code)
                    .await
                    .map(|grant| record_from_grant(grant, AuthMethod::Code));
                Some(AuthEvent::CodeResult { result })
            }
            Effect::PersistSession { record } => {
                info!(user_id = %record.user_id, "Sign-in succeeded, handing session off");
                if let Err(e) = self.sessions.save(&record).await {
                    // The attempt still succeeded; the session just
                    // won't survive a restart.
                    warn!(error = %e, "Failed to persist session record");
                }
                None
            }
        }
    }

    /// The full passkey round: challenge fetch, ceremony, server
    /// verification. The challenge is consumed by the one ceremony
    /// call whatever the outcome.
    async fn run_passkey(
        &self,
        email: &str,
        register: bool,
        display_name: Option<String>,
    ) -> CredentialOutcome {
        let purpose = if register {
            ChallengePurpose::Registration
        } else {
            ChallengePurpose::Authentication
        };

        let challenge = match self.api.get_challenge(email, purpose).await {
            Ok(c) => c,
            Err(e) if e.retryable => return CredentialOutcome::Unavailable(e),
            Err(e) => return CredentialOutcome::Failed(e),
        };
        let challenge_id = challenge.challenge_id.clone();

        let ceremony_result = if register {
            let name = display_name.as_deref().unwrap_or(email);
            self.ceremony.register(challenge, email, name).await
        } else {
            self.ceremony.authenticate(challenge).await
        };

        let credential = match ceremony_result {
            Ok(credential) => credential,
            Err(CeremonyError::Cancelled) => return CredentialOutcome::Cancelled,
            Err(err @ CeremonyError::NotSupported) => {
                return CredentialOutcome::NotSupported(err.into())
            }
            Err(err) => return CredentialOutcome::Failed(err.into()),
        };

        match self
            .api
            .verify_credential(email, &challenge_id, &credential)
            .await
        {
            Ok(grant) => {
                CredentialOutcome::Verified(record_from_grant(grant, AuthMethod::Passkey))
            }
            Err(e) if e.retryable => CredentialOutcome::Unavailable(e),
            Err(e) => CredentialOutcome::Failed(e),
        }
    }

    fn set_state(&self, next: SignInState) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if *state == next {
                false
            } else {
                debug!(old = ?*state, new = ?next, "Sign-in state transition");
                *state = next.clone();
                true
            }
        };

        if changed {
            let subscribers = self.subscribers.lock().unwrap();
            for callback in subscribers.iter() {
                if catch_unwind(AssertUnwindSafe(|| callback(&next))).is_err() {
                    warn!("Sign-in state subscriber panicked");
                }
            }
        }
    }
}

/// Mint a session record from a verification grant. Tokens are taken
/// as one set; nothing is merged from older state.
fn record_from_grant(grant: TokenGrant, auth_method: AuthMethod) -> SessionRecord {
    SessionRecord {
        user_id: grant.user.id,
        email: grant.user.email,
        name: grant.user.name,
        email_verified: grant.user.email_verified,
        access_token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_at: Utc::now().timestamp_millis() + grant.expires_in * 1000,
        auth_method,
    }
}
