//! # State machine transition matrices
//!
//! Exhaustive NxN checks for the onboarding step machine and the OTP
//! challenge machine, plus a property test over random operation sequences.

use proptest::prelude::*;
use veil_core::{Amount, ChallengeId, PhoneLocale, SessionKey, Timestamp, WalletAddress};
use veil_state::{
    ChallengeStatus, DocumentKind, DocumentPayload, Effect, ExtractedData, OnboardingSession,
    OnboardingStep, PhoneConfirmation, ProvisionedKeys, SessionError, TransitionError,
};

fn t0() -> Timestamp {
    Timestamp::parse("2026-04-01T08:00:00Z").unwrap()
}

/// A session parked at `step` with every precondition for leaving it met.
fn ready_session_at(step: OnboardingStep) -> OnboardingSession {
    let mut s = OnboardingSession::new(SessionKey::new("matrix").unwrap(), t0());
    let now = t0();
    for target in OnboardingStep::ALL.iter().skip(1) {
        if s.current_step() == step {
            break;
        }
        match s.current_step() {
            OnboardingStep::PhoneVerification => {
                let phone = PhoneLocale::india().parse("9876543210").unwrap();
                s.confirm_phone(
                    PhoneConfirmation {
                        phone,
                        challenge_id: ChallengeId::new(),
                        verified_at: now,
                    },
                    now,
                )
                .unwrap();
            }
            OnboardingStep::WalletBinding => {
                s.set_wallet_connection(
                    WalletAddress::new("0xabc").unwrap(),
                    Amount::new("5").unwrap(),
                    "metamask",
                    now,
                )
                .unwrap();
            }
            OnboardingStep::Kyc => {
                s.capture_document(
                    DocumentKind::NationalId,
                    DocumentPayload {
                        reference: "blob://id".into(),
                        extracted: Some(ExtractedData {
                            full_name: Some("Asha Rao".into()),
                            id_number: Some("X1".into()),
                            ..Default::default()
                        }),
                    },
                    now,
                )
                .unwrap();
                s.complete_kyc(now).unwrap();
            }
            OnboardingStep::KeyProvisioning => {
                s.record_provisioned_keys(
                    ProvisionedKeys {
                        key_reference: "keyset-1".into(),
                        public_key: "pk".into(),
                        provisioned_at: now,
                    },
                    now,
                )
                .unwrap();
            }
            _ => {}
        }
        s.set_step(*target, now).unwrap();
    }
    assert_eq!(s.current_step(), step);
    s
}

// =========================================================================
// OnboardingStep: 6 steps, 36 transitions
// =========================================================================

#[test]
fn step_transition_matrix_exhaustive() {
    for from in OnboardingStep::ALL {
        for to in OnboardingStep::ALL {
            let expected_valid = from.next() == Some(to);
            assert_eq!(
                from.valid_transitions().contains(&to),
                expected_valid,
                "step transition {from} -> {to}"
            );
        }
    }
}

#[test]
fn set_step_matrix_on_ready_sessions() {
    for from in OnboardingStep::ALL {
        for to in OnboardingStep::ALL {
            let mut s = ready_session_at(from);
            let result = s.set_step(to, t0());
            if to == from || from.is_terminal() {
                assert_eq!(result, Ok(Effect::Unchanged), "{from} -> {to}");
            } else if from.next() == Some(to) && from != OnboardingStep::KeyProvisioning {
                assert_eq!(result, Ok(Effect::Applied), "{from} -> {to}");
                assert_eq!(s.current_step(), to);
            } else if from.next() == Some(to) {
                // Keys are only recorded on the way out of KeyProvisioning,
                // so a session parked there cannot complete.
                assert!(
                    matches!(
                        result,
                        Err(SessionError::Transition(TransitionError::PreconditionUnmet { .. }))
                    ),
                    "{from} -> {to}: {result:?}"
                );
            } else {
                assert_eq!(
                    result,
                    Err(SessionError::Transition(TransitionError::InvalidTransition { from, to })),
                    "{from} -> {to}"
                );
                assert_eq!(s.current_step(), from);
            }
        }
    }
}

#[test]
fn step_names_are_screaming_snake_case_on_the_wire() {
    for step in OnboardingStep::ALL {
        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, format!("\"{}\"", step.name()));
    }
}

// =========================================================================
// ChallengeStatus: 5 states, 25 transitions
// =========================================================================

#[test]
fn challenge_transition_matrix_exhaustive() {
    use ChallengeStatus::*;
    let states = [Pending, Verifying, Verified, Expired, Failed];
    let expected_valid = [
        (Pending, Verifying),
        (Pending, Expired),
        (Verifying, Pending),
        (Verifying, Verified),
        (Verifying, Failed),
        (Verifying, Expired),
    ];

    for from in states {
        for to in states {
            assert_eq!(
                from.valid_transitions().contains(&to),
                expected_valid.contains(&(from, to)),
                "challenge transition {from} -> {to}"
            );
        }
    }
}

#[test]
fn challenge_terminal_states() {
    assert!(ChallengeStatus::Verified.is_terminal());
    assert!(ChallengeStatus::Expired.is_terminal());
    assert!(ChallengeStatus::Failed.is_terminal());
    assert!(!ChallengeStatus::Pending.is_terminal());
    assert!(!ChallengeStatus::Verifying.is_terminal());
}

// =========================================================================
// Random operation sequences never skip a step
// =========================================================================

proptest! {
    #[test]
    fn random_set_step_sequences_only_move_forward_one_step(
        targets in proptest::collection::vec(0usize..6, 1..40)
    ) {
        let mut s = ready_session_at(OnboardingStep::Welcome);
        let mut previous = s.current_step();
        for idx in targets {
            let _ = s.set_step(OnboardingStep::ALL[idx], t0());
            let now = s.current_step();
            prop_assert!(now == previous || previous.next() == Some(now));
            previous = now;
        }
        // Without a phone confirmation the session can never pass
        // PhoneVerification.
        prop_assert!(s.current_step() <= OnboardingStep::PhoneVerification);
        prop_assert_eq!(s.transition_log().len(), s.current_step().ordinal());
    }
}
