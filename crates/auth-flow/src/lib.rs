//! Client-side authentication orchestration core.
//!
//! This crate provides:
//! - A deterministic sign-in state machine (email -> method selection
//!   -> passkey or one-time code -> session hand-off)
//! - A credential ceremony adapter over the platform's public-key
//!   credential capability, with outcome classification
//! - A session lifecycle manager owning the persisted session: restore,
//!   expiry detection, single-flight token refresh, sign-out
//!
//! The remote identity provider and the storage backend are injected
//! collaborators; nothing here renders UI or performs I/O beyond those
//! seams.

mod ceremony;
mod error;
mod flow;
mod global;
mod machine;
mod session;

pub use ceremony::{
    AssertionRequest, CeremonyAdapter, CeremonyError, CeremonyTiming, CredentialCapability,
    PlatformCredential, PlatformError, PlatformErrorCode, RegistrationRequest,
};
pub use error::{AuthError, AuthResult, ErrorClass};
pub use flow::{SignInFlow, StateCallback};
pub use global::{install_sessions, sessions};
pub use machine::{transition, AuthEvent, CredentialOutcome, Effect, FlowConfig, SignInState, Step};
pub use session::session_machine;
pub use session::{
    LifecycleState, RefreshConfig, SessionCallback, SessionLifecycleManager, SessionSnapshot,
    SessionStatus,
};
