//! Sign-in state machine.
//!
//! A pure transition function over explicit states and events. Side
//! effects (network and ceremony calls) are *described* by [`Effect`]
//! values, never executed here; the shell in [`flow`](crate::flow)
//! runs them and feeds results back as further events. That keeps every
//! `(state, event)` pair deterministically testable with no mocking at
//! this layer.
//!
//! ## State diagram
//!
//! ```text
//! EmailEntry --EmailChanged--> CheckingUser --UserCheckResult--+
//!                                                              |
//!        +---------------------+------------------------------+
//!        v                     v                              v
//!  PasskeyPrompt          CodeEntry                      NewUserInfo
//!        |                     |                              |
//!  MethodSelected        CodeSubmitted                 MethodSelected
//!        |                     v                              |
//!  CredentialResult      CodeVerifying --CodeResult--> ...    |
//!        |                     |                              |
//!        +----> Success <------+------------> (fallback) <----+
//!
//! Success / Error --Reset--> EmailEntry
//! ```

use auth_client::{ApiError, UserLookup};
use session_store::{AuthMethod, SessionRecord};

/// One step of the sign-in UI. Exactly one is active at a time, and
/// each carries only the data its step needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SignInState {
    /// Initial step: the user is typing an email address.
    EmailEntry {
        email: String,
        error: Option<ApiError>,
    },
    /// A user lookup is outstanding for `email`.
    CheckingUser { email: String },
    /// Waiting for the user to run (or retry) the passkey ceremony.
    PasskeyPrompt {
        email: String,
        /// True when this is a sign-up registration rather than an
        /// assertion against a stored credential.
        registering: bool,
        error: Option<ApiError>,
    },
    /// Waiting for the emailed one-time code (or magic-link token).
    CodeEntry {
        email: String,
        error: Option<ApiError>,
    },
    /// A code verification call is outstanding.
    CodeVerifying { email: String },
    /// The address is new; the user picks how to sign up.
    NewUserInfo { email: String },
    /// Terminal for this attempt: signed in, record handed off.
    Success { record: SessionRecord },
    /// Terminal for this attempt: unrecoverable failure.
    Error { error: ApiError },
}

impl SignInState {
    /// Fresh machine state.
    pub fn initial() -> Self {
        SignInState::EmailEntry {
            email: String::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SignInState::Success { .. } | SignInState::Error { .. })
    }
}

/// Outcome of a full passkey round: challenge fetch, ceremony, and
/// server verification, collapsed into one result event.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialOutcome {
    /// Server accepted the credential; a session record was minted.
    Verified(SessionRecord),
    /// User dismissed the prompt. Never fatal; the prompt stays up.
    Cancelled,
    /// Ceremony or verification failed outright; fall back to code.
    Failed(ApiError),
    /// A retryable infrastructure failure before or after the
    /// ceremony; stay on the prompt with an inline error.
    Unavailable(ApiError),
    /// No passkey capability; the method is disabled for this session.
    NotSupported(ApiError),
}

/// Inputs to the machine. Events are the only way state changes.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// The email field settled on a new value (caller debounces).
    EmailChanged { email: String },
    /// Result of the user lookup.
    UserCheckResult { result: Result<UserLookup, ApiError> },
    /// The user picked a sign-in method.
    MethodSelected {
        method: AuthMethod,
        /// Display name for sign-up registration; defaults to the email.
        display_name: Option<String>,
    },
    /// Result of a passkey round.
    CredentialResult { outcome: CredentialOutcome },
    /// The user submitted a one-time code (or a magic link resolved to
    /// its token).
    CodeSubmitted { code: String },
    /// Result of code verification.
    CodeResult { result: Result<SessionRecord, ApiError> },
    /// Abandon the attempt and return to email entry.
    Reset,
}

/// Asynchronous work requested by a transition. Described, not
/// executed: the shell owns all I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Look the email up with the remote provider.
    CheckUser { email: String },
    /// Fetch a challenge and run the full passkey round.
    RunPasskey {
        email: String,
        register: bool,
        display_name: Option<String>,
    },
    /// Verify the submitted code.
    VerifyCode { email: String, code: String },
    /// Hand the fresh record to the session lifecycle manager.
    PersistSession { record: SessionRecord },
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub next: SignInState,
    pub effect: Option<Effect>,
    /// The event did not apply to the current state and was ignored.
    pub rejected: bool,
}

impl Step {
    fn to(next: SignInState) -> Self {
        Self {
            next,
            effect: None,
            rejected: false,
        }
    }

    fn with_effect(next: SignInState, effect: Effect) -> Self {
        Self {
            next,
            effect: Some(effect),
            rejected: false,
        }
    }

    fn rejected(state: &SignInState) -> Self {
        Self {
            next: state.clone(),
            effect: None,
            rejected: true,
        }
    }
}

/// Knobs for transition behavior.
#[derive(Debug, Clone, Default)]
pub struct FlowConfig {
    /// Offer the passkey prompt to existing users even without a
    /// stored credential (discoverable-credential optimism). Off by
    /// default: a guaranteed-failing ceremony is a worse first step
    /// than a code prompt.
    pub passkey_first: bool,
}

/// Cheap syntactic gate; the server does real validation.
fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

/// Apply one event to the machine.
///
/// Pure: the same `(state, event, config)` always yields the same
/// [`Step`]. Events that do not apply to the current state return the
/// unchanged state with `rejected` set.
pub fn transition(state: &SignInState, event: AuthEvent, config: &FlowConfig) -> Step {
    use SignInState::*;

    match (state, event) {
        // Reset applies everywhere and is the only exit from the
        // terminal states.
        (_, AuthEvent::Reset) => Step::to(SignInState::initial()),

        (Success { .. } | Error { .. }, _) => Step::rejected(state),

        // A settled email restarts the lookup from any pre-verification
        // step.
        (
            EmailEntry { .. } | PasskeyPrompt { .. } | CodeEntry { .. } | NewUserInfo { .. }
            | CheckingUser { .. },
            AuthEvent::EmailChanged { email },
        ) => {
            if !looks_like_email(&email) {
                return Step::to(EmailEntry { email, error: None });
            }
            Step::with_effect(
                CheckingUser {
                    email: email.clone(),
                },
                Effect::CheckUser { email },
            )
        }

        (CheckingUser { email }, AuthEvent::UserCheckResult { result }) => match result {
            Ok(lookup) if lookup.rate_limited => Step::to(Error {
                error: ApiError::rate_limited(None),
            }),
            Ok(lookup) if lookup.exists && lookup.has_passkey => Step::to(PasskeyPrompt {
                email: email.clone(),
                registering: false,
                error: None,
            }),
            Ok(lookup) if lookup.exists => {
                if config.passkey_first {
                    Step::to(PasskeyPrompt {
                        email: email.clone(),
                        registering: false,
                        error: None,
                    })
                } else {
                    Step::to(CodeEntry {
                        email: email.clone(),
                        error: None,
                    })
                }
            }
            Ok(_) => Step::to(NewUserInfo {
                email: email.clone(),
            }),
            Err(error) if error.retryable => Step::to(EmailEntry {
                email: email.clone(),
                error: Some(error),
            }),
            Err(error) => Step::to(Error { error }),
        },

        // Method selection from the prompt runs (or re-runs) the
        // ceremony; from the new-user step it picks the sign-up path.
        (
            PasskeyPrompt {
                email, registering, ..
            },
            AuthEvent::MethodSelected {
                method: AuthMethod::Passkey,
                display_name,
            },
        ) => Step::with_effect(
            PasskeyPrompt {
                email: email.clone(),
                registering: *registering,
                error: None,
            },
            Effect::RunPasskey {
                email: email.clone(),
                register: *registering,
                display_name,
            },
        ),
        (
            PasskeyPrompt { email, .. },
            AuthEvent::MethodSelected {
                method: AuthMethod::Code | AuthMethod::MagicLink,
                ..
            },
        ) => Step::to(CodeEntry {
            email: email.clone(),
            error: None,
        }),

        (
            NewUserInfo { email },
            AuthEvent::MethodSelected {
                method: AuthMethod::Passkey,
                display_name,
            },
        ) => Step::with_effect(
            PasskeyPrompt {
                email: email.clone(),
                registering: true,
                error: None,
            },
            Effect::RunPasskey {
                email: email.clone(),
                register: true,
                display_name,
            },
        ),
        (
            NewUserInfo { email },
            AuthEvent::MethodSelected {
                method: AuthMethod::Code | AuthMethod::MagicLink,
                ..
            },
        ) => Step::to(CodeEntry {
            email: email.clone(),
            error: None,
        }),

        (
            PasskeyPrompt {
                email, registering, ..
            },
            AuthEvent::CredentialResult { outcome },
        ) => match outcome {
            CredentialOutcome::Verified(record) => Step::with_effect(
                Success {
                    record: record.clone(),
                },
                Effect::PersistSession { record },
            ),
            // Cancellation keeps the exact same state: the user may
            // retry or pick a fallback.
            CredentialOutcome::Cancelled => Step::to(state.clone()),
            CredentialOutcome::Failed(error) | CredentialOutcome::NotSupported(error) => {
                Step::to(CodeEntry {
                    email: email.clone(),
                    error: Some(error),
                })
            }
            CredentialOutcome::Unavailable(error) => Step::to(PasskeyPrompt {
                email: email.clone(),
                registering: *registering,
                error: Some(error),
            }),
        },

        (CodeEntry { email, .. }, AuthEvent::CodeSubmitted { code }) => Step::with_effect(
            CodeVerifying {
                email: email.clone(),
            },
            Effect::VerifyCode {
                email: email.clone(),
                code,
            },
        ),

        (CodeVerifying { email }, AuthEvent::CodeResult { result }) => match result {
            Ok(record) => Step::with_effect(
                Success {
                    record: record.clone(),
                },
                Effect::PersistSession { record },
            ),
            // Rate limiting is the one fatal code failure; a wrong or
            // expired code just re-opens the entry field.
            Err(error) if error.is_rate_limited() => Step::to(Error { error }),
            Err(error) => Step::to(CodeEntry {
                email: email.clone(),
                error: Some(error),
            }),
        },

        _ => Step::rejected(state),
    }
}
