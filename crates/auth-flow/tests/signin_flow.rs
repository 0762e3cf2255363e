//! End-to-end sign-in scenarios: machine, effect shell, ceremony
//! adapter, and session hand-off wired together over mocks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use auth_client::{
    ApiError, ApiErrorCode, ApiResult, AuthApi, AuthUser, Challenge, ChallengePurpose,
    PortableCredential, RefreshedTokens, TokenGrant, UserLookup,
};
use auth_flow::{
    AssertionRequest, AuthEvent, CeremonyAdapter, CredentialCapability, PlatformCredential,
    PlatformError, PlatformErrorCode, RegistrationRequest, SessionLifecycleManager, SignInFlow,
    SignInState,
};
use session_store::{AuthMethod, MemoryStore, SessionStore};

struct MockApi {
    lookup: UserLookup,
    check_delay: Duration,
    verify_code_fails_once: Mutex<Option<ApiError>>,
    check_calls: AtomicUsize,
    challenge_calls: AtomicUsize,
    verify_credential_calls: AtomicUsize,
}

impl MockApi {
    fn for_user(exists: bool, has_passkey: bool) -> Self {
        Self {
            lookup: UserLookup {
                exists,
                has_passkey,
                has_valid_pending_code: false,
                rate_limited: false,
            },
            check_delay: Duration::ZERO,
            verify_code_fails_once: Mutex::new(None),
            check_calls: AtomicUsize::new(0),
            challenge_calls: AtomicUsize::new(0),
            verify_credential_calls: AtomicUsize::new(0),
        }
    }

    fn grant() -> TokenGrant {
        TokenGrant {
            user: AuthUser {
                id: "user-1".to_string(),
                email: "a@x.com".to_string(),
                name: Some("Ada".to_string()),
                email_verified: true,
            },
            access_token: "at-fresh".to_string(),
            refresh_token: "rt-fresh".to_string(),
            expires_in: 3600,
        }
    }
}

#[async_trait]
impl AuthApi for MockApi {
    async fn check_user(&self, _email: &str) -> ApiResult<UserLookup> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.check_delay).await;
        Ok(self.lookup.clone())
    }

    async fn get_challenge(
        &self,
        _email: &str,
        _purpose: ChallengePurpose,
    ) -> ApiResult<Challenge> {
        self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Challenge {
            challenge_id: "ch_1".to_string(),
            challenge: vec![1, 2, 3],
            rp_id: "example.com".to_string(),
            timeout_ms: 60_000,
            allow_credentials: vec![],
        })
    }

    async fn verify_credential(
        &self,
        _email: &str,
        challenge_id: &str,
        credential: &PortableCredential,
    ) -> ApiResult<TokenGrant> {
        self.verify_credential_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(challenge_id, "ch_1");
        assert_eq!(credential.credential_type, "public-key");
        Ok(Self::grant())
    }

    async fn verify_code(&self, _email: &str, code: &str) -> ApiResult<TokenGrant> {
        if let Some(err) = self.verify_code_fails_once.lock().unwrap().take() {
            return Err(err);
        }
        assert_eq!(code, "123456");
        Ok(Self::grant())
    }

    async fn refresh_token(&self, _refresh_token: &str) -> ApiResult<RefreshedTokens> {
        unreachable!("sign-in never refreshes")
    }

    async fn sign_out(&self, _access_token: &str, _refresh_token: &str) -> ApiResult<()> {
        Ok(())
    }
}

/// Capability whose ceremonies succeed, or fail with a fixed code.
struct MockCapability {
    fail_with: Option<PlatformErrorCode>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl MockCapability {
    fn succeeding() -> Self {
        Self {
            fail_with: None,
            create_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
        }
    }

    fn failing(code: PlatformErrorCode) -> Self {
        Self {
            fail_with: Some(code),
            ..Self::succeeding()
        }
    }

    fn credential() -> PlatformCredential {
        PlatformCredential {
            id: vec![7, 7],
            client_data_json: b"{}".to_vec(),
            authenticator_data: Some(vec![1]),
            signature: Some(vec![2]),
            user_handle: None,
            attestation_object: None,
        }
    }
}

#[async_trait]
impl CredentialCapability for MockCapability {
    async fn create(
        &self,
        request: RegistrationRequest,
    ) -> Result<PlatformCredential, PlatformError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.require_user_verification);
        match self.fail_with {
            Some(code) => Err(PlatformError::new(Some(code), "failed")),
            None => Ok(Self::credential()),
        }
    }

    async fn get(&self, request: AssertionRequest) -> Result<PlatformCredential, PlatformError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        assert!(request.require_user_verification);
        match self.fail_with {
            Some(code) => Err(PlatformError::new(Some(code), "failed")),
            None => Ok(Self::credential()),
        }
    }
}

fn build_flow(
    api: MockApi,
    capability: MockCapability,
) -> (Arc<MockApi>, Arc<MemoryStore>, SignInFlow) {
    let api = Arc::new(api);
    let store = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionLifecycleManager::new(api.clone(), store.clone()));
    let flow = SignInFlow::new(
        api.clone(),
        CeremonyAdapter::new(Arc::new(capability)),
        sessions,
    );
    (api, store, flow)
}

#[tokio::test]
async fn test_passkey_holder_signs_in_end_to_end() {
    let (api, store, flow) = build_flow(
        MockApi::for_user(true, true),
        MockCapability::succeeding(),
    );

    flow.handle(AuthEvent::EmailChanged {
        email: "a@x.com".to_string(),
    })
    .await;
    assert!(matches!(flow.state(), SignInState::PasskeyPrompt { .. }));

    flow.handle(AuthEvent::MethodSelected {
        method: AuthMethod::Passkey,
        display_name: None,
    })
    .await;

    match flow.state() {
        SignInState::Success { record } => {
            assert_eq!(record.access_token, "at-fresh");
            assert_eq!(record.auth_method, AuthMethod::Passkey);
        }
        other => panic!("expected Success, got {other:?}"),
    }

    // The record made it to storage through the lifecycle manager.
    let persisted = store.get_session().unwrap().unwrap();
    assert_eq!(persisted.user_id, "user-1");
    assert!(!persisted.access_token.is_empty());
    assert!(!persisted.is_expired());

    assert_eq!(api.challenge_calls.load(Ordering::SeqCst), 1);
    assert_eq!(api.verify_credential_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_credential_falls_back_to_code() {
    let (_, store, flow) = build_flow(
        MockApi::for_user(true, true),
        MockCapability::failing(PlatformErrorCode::NotFound),
    );

    flow.handle(AuthEvent::EmailChanged {
        email: "a@x.com".to_string(),
    })
    .await;
    flow.handle(AuthEvent::MethodSelected {
        method: AuthMethod::Passkey,
        display_name: None,
    })
    .await;

    // Ceremony found no credential; the flow lands on code entry with
    // the failure surfaced inline.
    match flow.state() {
        SignInState::CodeEntry { email, error } => {
            assert_eq!(email, "a@x.com");
            assert_eq!(error.unwrap().code, ApiErrorCode::CredentialNotFound);
        }
        other => panic!("expected CodeEntry, got {other:?}"),
    }

    flow.handle(AuthEvent::CodeSubmitted {
        code: "123456".to_string(),
    })
    .await;

    match flow.state() {
        SignInState::Success { record } => {
            assert_eq!(record.auth_method, AuthMethod::Code)
        }
        other => panic!("expected Success, got {other:?}"),
    }
    assert!(store.get_session().unwrap().is_some());
}

#[tokio::test]
async fn test_cancelled_ceremony_keeps_prompt_open() {
    let (api, store, flow) = build_flow(
        MockApi::for_user(true, true),
        MockCapability::failing(PlatformErrorCode::Cancelled),
    );

    flow.handle(AuthEvent::EmailChanged {
        email: "a@x.com".to_string(),
    })
    .await;
    flow.handle(AuthEvent::MethodSelected {
        method: AuthMethod::Passkey,
        display_name: None,
    })
    .await;

    assert!(matches!(flow.state(), SignInState::PasskeyPrompt { .. }));
    assert!(store.get_session().unwrap().is_none());

    // Retrying consumes a fresh challenge.
    flow.handle(AuthEvent::MethodSelected {
        method: AuthMethod::Passkey,
        display_name: None,
    })
    .await;
    assert_eq!(api.challenge_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_new_user_registers_a_passkey() {
    let capability = MockCapability::succeeding();
    let (api, store, flow) = build_flow(MockApi::for_user(false, false), capability);

    flow.handle(AuthEvent::EmailChanged {
        email: "new@x.com".to_string(),
    })
    .await;
    assert!(matches!(flow.state(), SignInState::NewUserInfo { .. }));

    flow.handle(AuthEvent::MethodSelected {
        method: AuthMethod::Passkey,
        display_name: Some("Ada".to_string()),
    })
    .await;

    assert!(matches!(flow.state(), SignInState::Success { .. }));
    assert_eq!(api.challenge_calls.load(Ordering::SeqCst), 1);
    assert!(store.get_session().unwrap().is_some());
}

#[tokio::test]
async fn test_wrong_code_reopens_entry_then_succeeds() {
    let mut api = MockApi::for_user(true, false);
    *api.verify_code_fails_once.lock().unwrap() = Some(ApiError::new(
        ApiErrorCode::InvalidCode,
        "wrong code",
        false,
    ));
    let (_, _, flow) = build_flow(api, MockCapability::succeeding());

    flow.handle(AuthEvent::EmailChanged {
        email: "a@x.com".to_string(),
    })
    .await;
    assert!(matches!(flow.state(), SignInState::CodeEntry { .. }));

    flow.handle(AuthEvent::CodeSubmitted {
        code: "000000".to_string(),
    })
    .await;
    match flow.state() {
        SignInState::CodeEntry { error, .. } => {
            assert_eq!(error.unwrap().code, ApiErrorCode::InvalidCode)
        }
        other => panic!("expected CodeEntry, got {other:?}"),
    }

    flow.handle(AuthEvent::CodeSubmitted {
        code: "123456".to_string(),
    })
    .await;
    assert!(matches!(flow.state(), SignInState::Success { .. }));
}

#[tokio::test]
async fn test_events_arriving_mid_call_apply_in_order() {
    let mut api = MockApi::for_user(true, true);
    api.check_delay = Duration::from_millis(50);
    let (_, _, flow) = build_flow(api, MockCapability::succeeding());
    let flow = Arc::new(flow);

    let driver = {
        let flow = flow.clone();
        tokio::spawn(async move {
            flow.handle(AuthEvent::EmailChanged {
                email: "a@x.com".to_string(),
            })
            .await;
        })
    };

    // Land a reset while the lookup is still in flight; it must queue
    // behind the outstanding call, not interleave with it.
    tokio::time::sleep(Duration::from_millis(10)).await;
    flow.handle(AuthEvent::Reset).await;
    driver.await.unwrap();

    assert_eq!(flow.state(), SignInState::initial());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_events_are_never_stranded() {
    let mut api = MockApi::for_user(true, true);
    api.check_delay = Duration::from_millis(5);
    let (api, _, flow) = build_flow(api, MockCapability::succeeding());
    let flow = Arc::new(flow);

    // Callers racing the driver for the queue must not leave an event
    // behind when they lose.
    let mut handles = Vec::new();
    for _ in 0..16 {
        let flow = flow.clone();
        handles.push(tokio::spawn(async move {
            flow.handle(AuthEvent::EmailChanged {
                email: "a@x.com".to_string(),
            })
            .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Every event restarts the lookup exactly once.
    assert_eq!(api.check_calls.load(Ordering::SeqCst), 16);
    assert!(matches!(flow.state(), SignInState::PasskeyPrompt { .. }));
}

#[tokio::test]
async fn test_subscribers_see_each_state_change() {
    let (_, _, flow) = build_flow(MockApi::for_user(true, true), MockCapability::succeeding());

    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    flow.subscribe(Box::new(move |state| {
        let label = match state {
            SignInState::EmailEntry { .. } => "email_entry",
            SignInState::CheckingUser { .. } => "checking_user",
            SignInState::PasskeyPrompt { .. } => "passkey_prompt",
            SignInState::CodeEntry { .. } => "code_entry",
            SignInState::CodeVerifying { .. } => "code_verifying",
            SignInState::NewUserInfo { .. } => "new_user_info",
            SignInState::Success { .. } => "success",
            SignInState::Error { .. } => "error",
        };
        sink.lock().unwrap().push(label.to_string());
    }));

    flow.handle(AuthEvent::EmailChanged {
        email: "a@x.com".to_string(),
    })
    .await;
    flow.handle(AuthEvent::MethodSelected {
        method: AuthMethod::Passkey,
        display_name: None,
    })
    .await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["checking_user", "passkey_prompt", "success"]
    );
}
