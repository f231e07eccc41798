//! # Cross-crate onboarding flows
//!
//! Drives `AuthGate` and `StepSequencer` together against the real stores,
//! with a manual clock and the mock collaborators.

use std::sync::Arc;

use veil_auth::{
    AuthConfig, AuthError, AuthGate, ConfigError, DeploymentEnvironment, MockVerificationProvider,
    ProviderError, SubmitOutcome, UnavailableProvider, VerifiedPhone,
};
use veil_core::{Clock, ManualClock, SessionKey, Timestamp};
use veil_onboarding::{MockKeyProvisioner, OnboardingError, StepSequencer};
use veil_state::{
    ChallengeError, ChallengeStatus, DocumentKind, DocumentPayload, ExtractedData, KycError,
    OnboardingStep, TransitionError,
};
use veil_store::{FileSessionStore, MemorySessionStore, PersistenceError, SessionStore};

// =========================================================================
// Fixtures
// =========================================================================

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Timestamp::parse("2026-04-01T08:00:00Z").unwrap(),
    ))
}

fn key(s: &str) -> SessionKey {
    SessionKey::new(s).unwrap()
}

fn gate_with(provider: Arc<MockVerificationProvider>, clock: Arc<ManualClock>) -> AuthGate {
    AuthGate::new(provider, clock, AuthConfig::default())
}

fn id_document(name: Option<&str>, id: Option<&str>) -> DocumentPayload {
    DocumentPayload {
        reference: "blob://kyc/front".into(),
        extracted: Some(ExtractedData {
            full_name: name.map(str::to_string),
            id_number: id.map(str::to_string),
            ..Default::default()
        }),
    }
}

async fn verify(gate: &AuthGate, phone: &str) -> VerifiedPhone {
    let challenge = gate.request_challenge(phone).await.unwrap();
    match gate.submit_code(challenge.id, "123456").await.unwrap() {
        SubmitOutcome::Verified(v) => v,
        other => panic!("expected Verified, got {other:?}"),
    }
}

/// Drive a sequencer from Welcome to Kyc.
async fn advance_to_kyc(sequencer: &StepSequencer, gate: &AuthGate) {
    sequencer.next_step().await.unwrap();
    let verified = verify(gate, "9876543210").await;
    sequencer.confirm_phone(&verified).await.unwrap();
    sequencer.next_step().await.unwrap();
    sequencer
        .set_wallet_connection("0xabc123", "100", "metamask")
        .await
        .unwrap();
    sequencer.next_step().await.unwrap();
    assert_eq!(sequencer.current_step().await, OnboardingStep::Kyc);
}

// =========================================================================
// Named scenarios
// =========================================================================

#[tokio::test]
async fn verified_phone_unlocks_wallet_binding() {
    let clock = clock();
    let provider = Arc::new(MockVerificationProvider::default());
    let gate = gate_with(provider.clone(), clock.clone());
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let sequencer = StepSequencer::load(store, key("scenario-a"), clock.clone())
        .await
        .unwrap();

    sequencer.next_step().await.unwrap();

    let c1 = gate.request_challenge("9876543210").await.unwrap();
    assert_eq!(c1.expires_in, 30);
    assert_eq!(c1.status, ChallengeStatus::Pending);

    let outcome = gate.submit_code(c1.id, "123456").await.unwrap();
    let SubmitOutcome::Verified(verified) = outcome else {
        panic!("expected Verified, got {outcome:?}");
    };
    assert_eq!(verified.phone().e164(), "+919876543210");
    assert!(!verified.is_local_fallback());

    sequencer.confirm_phone(&verified).await.unwrap();
    let session = sequencer.next_step().await.unwrap();
    assert_eq!(session.current_step(), OnboardingStep::WalletBinding);
    assert_eq!(provider.send_count(), 1);
    assert_eq!(provider.verify_count(), 1);
}

#[tokio::test]
async fn resend_after_idle_window_supersedes_first_challenge() {
    let clock = clock();
    let provider = Arc::new(MockVerificationProvider::default());
    let gate = gate_with(provider.clone(), clock.clone());

    let c1 = gate.request_challenge("9876543210").await.unwrap();
    clock.advance(30);
    gate.tick();

    let c2 = gate.resend().await.unwrap();
    assert_ne!(c1.id, c2.id);
    assert_eq!(c2.expires_in, 30);

    let err = gate.submit_code(c1.id, "000000").await.unwrap_err();
    assert!(
        matches!(err, AuthError::Challenge(ChallengeError::Expired { id }) if id == c1.id),
        "got {err:?}"
    );
    // The stale submission never reached the provider.
    assert_eq!(provider.verify_count(), 0);
    assert_eq!(provider.send_count(), 2);
}

#[tokio::test]
async fn kyc_without_full_name_stays_incomplete() {
    let clock = clock();
    let gate = gate_with(Arc::new(MockVerificationProvider::default()), clock.clone());
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let sequencer = StepSequencer::load(store, key("scenario-c"), clock.clone())
        .await
        .unwrap();
    advance_to_kyc(&sequencer, &gate).await;

    sequencer
        .capture_document(DocumentKind::NationalId, id_document(None, Some("X1234567")))
        .await
        .unwrap();

    let err = sequencer.complete_kyc().await.unwrap_err();
    match err {
        OnboardingError::Kyc(KycError::IncompleteData { missing }) => {
            assert_eq!(missing, vec!["full_name"]);
        }
        other => panic!("expected IncompleteData, got {other:?}"),
    }
    assert!(!sequencer.session().await.is_kyc_completed());

    let err = sequencer.next_step().await.unwrap_err();
    assert!(matches!(
        err,
        OnboardingError::Transition(TransitionError::PreconditionUnmet {
            from: OnboardingStep::Kyc,
            to: OnboardingStep::KeyProvisioning,
            ..
        })
    ));
    assert_eq!(sequencer.current_step().await, OnboardingStep::Kyc);
}

// =========================================================================
// Full journey and durability
// =========================================================================

#[tokio::test]
async fn full_onboarding_reaches_complete() {
    let clock = clock();
    let gate = gate_with(Arc::new(MockVerificationProvider::default()), clock.clone());
    let store = MemorySessionStore::new();
    let sequencer = StepSequencer::load(Arc::new(store.clone()), key("journey"), clock.clone())
        .await
        .unwrap();
    advance_to_kyc(&sequencer, &gate).await;

    sequencer
        .capture_document(
            DocumentKind::NationalId,
            id_document(Some("Asha Rao"), Some("X1234567")),
        )
        .await
        .unwrap();
    sequencer.complete_kyc().await.unwrap();
    sequencer.next_step().await.unwrap();

    let provisioner = MockKeyProvisioner::new();
    let keys = sequencer.provision_keys(&provisioner).await.unwrap();
    let again = sequencer.provision_keys(&provisioner).await.unwrap();
    assert_eq!(keys, again);
    assert_eq!(provisioner.call_count(), 1);

    let session = sequencer.next_step().await.unwrap();
    assert!(session.is_complete());

    let record = session.kyc_record().unwrap();
    assert!(record.verified);
    assert_eq!(
        record.phone_number.as_ref().map(|p| p.e164()),
        Some("+919876543210".to_string())
    );

    let steps: Vec<_> = session.transition_log().iter().map(|r| r.to).collect();
    assert_eq!(steps, OnboardingStep::ALL[1..].to_vec());

    let stored = store.load(&key("journey")).await.unwrap().unwrap();
    assert_eq!(stored, session);
}

#[tokio::test]
async fn restart_resumes_at_last_committed_step() {
    let dir = tempfile::tempdir().unwrap();
    let clock = clock();
    let gate = gate_with(Arc::new(MockVerificationProvider::default()), clock.clone());

    {
        let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path()));
        let sequencer = StepSequencer::load(store, key("device-7"), clock.clone())
            .await
            .unwrap();
        advance_to_kyc(&sequencer, &gate).await;
    }

    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path()));
    let resumed = StepSequencer::load(store, key("device-7"), clock.clone())
        .await
        .unwrap();
    let session = resumed.session().await;
    assert_eq!(session.current_step(), OnboardingStep::Kyc);
    assert_eq!(
        session.verified_phone().map(|c| c.phone.e164()),
        Some("+919876543210".to_string())
    );
    assert_eq!(session.wallet().map(|w| w.wallet_type.as_str()), Some("metamask"));

    // Progress continues from the resumed step.
    resumed
        .capture_document(
            DocumentKind::Passport,
            id_document(Some("Asha Rao"), Some("P7654321")),
        )
        .await
        .unwrap();
    resumed.complete_kyc().await.unwrap();
    assert_eq!(
        resumed.next_step().await.unwrap().current_step(),
        OnboardingStep::KeyProvisioning
    );
}

#[tokio::test]
async fn failed_write_blocks_the_transition() {
    let clock = clock();
    let store = MemorySessionStore::new();
    let sequencer = StepSequencer::load(Arc::new(store.clone()), key("flaky"), clock.clone())
        .await
        .unwrap();
    sequencer.next_step().await.unwrap();

    store.fail_writes(true);
    let gate = gate_with(Arc::new(MockVerificationProvider::default()), clock.clone());
    let verified = verify(&gate, "9876543210").await;
    let err = sequencer.confirm_phone(&verified).await.unwrap_err();
    assert!(matches!(err, OnboardingError::Persistence(_)));

    let session = sequencer.session().await;
    assert!(session.verified_phone().is_none());
    assert_eq!(session.current_step(), OnboardingStep::PhoneVerification);

    store.fail_writes(false);
    sequencer.confirm_phone(&verified).await.unwrap();
    assert_eq!(
        sequencer.next_step().await.unwrap().current_step(),
        OnboardingStep::WalletBinding
    );
}

#[tokio::test]
async fn second_writer_with_stale_copy_is_rejected() {
    let clock = clock();
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let first = StepSequencer::load(store.clone(), key("shared"), clock.clone())
        .await
        .unwrap();
    let second = StepSequencer::load(store.clone(), key("shared"), clock.clone())
        .await
        .unwrap();

    first.next_step().await.unwrap();
    let err = second.next_step().await.unwrap_err();
    assert!(matches!(
        err,
        OnboardingError::Persistence(PersistenceError::StaleRevision { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_next_step_calls_are_totally_ordered() {
    let clock = clock();
    let store = MemorySessionStore::new();
    let sequencer = Arc::new(
        StepSequencer::load(Arc::new(store.clone()), key("race"), clock.clone())
            .await
            .unwrap(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = Arc::clone(&sequencer);
            tokio::spawn(async move { s.next_step().await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        // Only Welcome -> PhoneVerification has no precondition; every
        // later call hits the missing phone confirmation.
        match handle.await.unwrap() {
            Ok(_) => applied += 1,
            Err(OnboardingError::Transition(TransitionError::PreconditionUnmet { .. })) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    let session = sequencer.session().await;
    assert_eq!(session.current_step(), OnboardingStep::PhoneVerification);
    assert_eq!(session.transition_log().len(), 1);
    assert!(applied >= 1);
    assert_eq!(store.load(&key("race")).await.unwrap().unwrap(), session);
}

#[tokio::test]
async fn reset_returns_to_welcome_and_persists() {
    let clock = clock();
    let gate = gate_with(Arc::new(MockVerificationProvider::default()), clock.clone());
    let store = MemorySessionStore::new();
    let sequencer = StepSequencer::load(Arc::new(store.clone()), key("again"), clock.clone())
        .await
        .unwrap();
    advance_to_kyc(&sequencer, &gate).await;
    let before = sequencer.session().await.revision();

    let session = sequencer.reset_onboarding().await.unwrap();
    assert_eq!(session.current_step(), OnboardingStep::Welcome);
    assert!(session.verified_phone().is_none());
    assert!(session.wallet().is_none());
    assert!(session.revision() > before);
    assert_eq!(store.load(&key("again")).await.unwrap().unwrap(), session);
}

// =========================================================================
// Development fallback
// =========================================================================

#[test]
fn fallback_is_refused_in_production_configuration() {
    let err = AuthConfig::from_lookup(|var| match var {
        "VEIL_ENV" => Some("production".into()),
        "VEIL_ALLOW_DEV_FALLBACK" => Some("true".into()),
        _ => None,
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::FallbackInProduction));
}

#[tokio::test]
async fn production_gate_never_verifies_without_provider() {
    let clock = clock();
    let config = AuthConfig {
        environment: DeploymentEnvironment::Production,
        ..AuthConfig::default()
    };
    let gate = AuthGate::new(Arc::new(UnavailableProvider), clock.clone(), config);

    let err = gate.request_challenge("9876543210").await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::Provider(ProviderError::NotConfigured { .. })
    ));
    assert!(gate.snapshot().is_none());
}

#[tokio::test]
async fn development_fallback_flows_into_the_session() {
    let clock = clock();
    let config = AuthConfig {
        allow_dev_fallback: true,
        ..AuthConfig::default()
    };
    let gate = AuthGate::new(Arc::new(UnavailableProvider), clock.clone(), config);
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    let sequencer = StepSequencer::load(store, key("dev"), clock.clone())
        .await
        .unwrap();
    sequencer.next_step().await.unwrap();

    let challenge = gate.request_challenge("9876543210").await.unwrap();
    assert!(challenge.local_fallback);
    let SubmitOutcome::Verified(verified) = gate.submit_code(challenge.id, "424242").await.unwrap()
    else {
        panic!("fallback challenge should verify");
    };
    assert!(verified.is_local_fallback());
    sequencer.confirm_phone(&verified).await.unwrap();
    assert_eq!(
        sequencer.next_step().await.unwrap().current_step(),
        OnboardingStep::WalletBinding
    );
    assert_eq!(
        sequencer.session().await.updated_at(),
        clock.now()
    );
}
