//! # AuthGate — Phone Verification Sub-Flow
//!
//! ```text
//! Idle ──request_challenge──▶ Pending ──submit_code──▶ Verifying ──▶ Verified
//!                               ▲  │                       │
//!                               │  └── expiry ──▶ Expired  ├──▶ Pending (wrong code)
//!                               └──── resend / request ────┘──▶ Failed  (attempt bound)
//! ```
//!
//! The gate owns at most one live [`OtpChallenge`]. Issuing a new one
//! supersedes the previous challenge, whose id is remembered so that late
//! submissions against it fail with `Expired` rather than `NotFound`. The
//! last [`SUPERSEDED_MEMORY`] ids are kept, plus any challenge superseded
//! while its verification was in flight, until that verification settles.
//!
//! ## Locking
//!
//! Gate state sits behind a `parking_lot::Mutex` that is never held across
//! an `.await`. A submission begins its attempt under the lock, releases it
//! for the provider round trip, and settles under the lock again against
//! the challenge id captured up front. If the challenge was replaced in
//! the meantime the result is discarded and the caller sees `Expired`.
//!
//! ## Development fallback
//!
//! When dispatch fails and the configuration permits it (non-production
//! environment *and* `allow_dev_fallback`), the gate issues a locally
//! accepted challenge flagged `local_fallback`. Such a challenge accepts any
//! well-formed code. In production the provider error is returned.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use veil_core::{ChallengeId, Clock, PhoneNumber, Timestamp, ValidationError};
use veil_state::{
    AttemptStart, ChallengeError, ChallengeStatus, OtpChallenge, PhoneConfirmation, Settlement,
};

use crate::config::AuthConfig;
use crate::countdown::CountdownSnapshot;
use crate::provider::{OtpCheck, ProviderError, VerificationProvider};

/// Number of superseded challenge ids remembered per gate. Older ids
/// answer `NotFound` unless a verification against them is still in flight.
pub const SUPERSEDED_MEMORY: usize = 8;

/// Errors surfaced by the gate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed phone number or code. Nothing changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Challenge unknown, expired, exhausted or in cooldown.
    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    /// The verification provider failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Proof that a phone number passed verification.
///
/// Only the gate constructs this, so holding one means a challenge really
/// reached `Verified`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPhone {
    phone: PhoneNumber,
    challenge_id: ChallengeId,
    verified_at: Timestamp,
    local_fallback: bool,
}

impl VerifiedPhone {
    pub fn phone(&self) -> &PhoneNumber {
        &self.phone
    }

    pub fn challenge_id(&self) -> ChallengeId {
        self.challenge_id
    }

    pub fn verified_at(&self) -> Timestamp {
        self.verified_at
    }

    /// Verified by the development fallback rather than the provider.
    pub fn is_local_fallback(&self) -> bool {
        self.local_fallback
    }

    /// The record stored in the onboarding session.
    pub fn to_confirmation(&self) -> PhoneConfirmation {
        PhoneConfirmation {
            phone: self.phone.clone(),
            challenge_id: self.challenge_id,
            verified_at: self.verified_at,
        }
    }

    fn from_challenge(challenge: &OtpChallenge, now: Timestamp) -> Self {
        Self {
            phone: challenge.phone.clone(),
            challenge_id: challenge.id,
            verified_at: challenge.verified_at.unwrap_or(now),
            local_fallback: challenge.local_fallback,
        }
    }
}

/// Result of a code submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The code was accepted (now or by an earlier submission).
    Verified(VerifiedPhone),
    /// Wrong code; the challenge is still open.
    Rejected {
        /// Submissions left.
        attempts_remaining: u32,
    },
    /// Wrong code and the attempt bound was reached.
    Failed,
    /// Another submission for this challenge is still being verified.
    Suppressed,
}

/// Read-only view of the current challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSnapshot {
    pub id: ChallengeId,
    pub phone: PhoneNumber,
    pub status: ChallengeStatus,
    pub expires_in: u64,
    pub cooldown_remaining: u64,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub local_fallback: bool,
}

impl ChallengeSnapshot {
    fn of(challenge: &OtpChallenge, now: Timestamp) -> Self {
        Self {
            id: challenge.id,
            phone: challenge.phone.clone(),
            status: challenge.status(),
            expires_in: challenge.expires_in(now),
            cooldown_remaining: challenge.cooldown_remaining(now),
            attempt_count: challenge.attempt_count(),
            max_attempts: challenge.max_attempts,
            local_fallback: challenge.local_fallback,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    current: Option<OtpChallenge>,
    superseded: VecDeque<ChallengeId>,
    /// Superseded while a verification was in flight. Held outside the
    /// memory bound until that verification settles.
    unsettled: HashSet<ChallengeId>,
}

impl GateState {
    /// Retire the live challenge, if any.
    fn retire_current(&mut self) {
        if let Some(mut old) = self.current.take() {
            if old.status() == ChallengeStatus::Verifying {
                self.unsettled.insert(old.id);
            }
            old.supersede();
            self.remember(old.id);
        }
    }

    fn remember(&mut self, id: ChallengeId) {
        self.superseded.push_back(id);
        while self.superseded.len() > SUPERSEDED_MEMORY {
            self.superseded.pop_front();
        }
    }

    /// The live challenge with `id`, or the error describing why it is not live.
    fn live_mut(&mut self, id: ChallengeId) -> Result<&mut OtpChallenge, ChallengeError> {
        match self.current.as_mut() {
            Some(c) if c.id == id => Ok(c),
            _ if self.superseded.contains(&id) || self.unsettled.contains(&id) => {
                Err(ChallengeError::Expired { id })
            }
            _ => Err(ChallengeError::NotFound { id: Some(id) }),
        }
    }

    /// The challenge an in-flight verification settles against. A challenge
    /// superseded mid-flight resolves to `Expired` exactly once.
    fn settling_mut(&mut self, id: ChallengeId) -> Result<&mut OtpChallenge, ChallengeError> {
        if self.unsettled.remove(&id) {
            return Err(ChallengeError::Expired { id });
        }
        self.live_mut(id)
    }
}

/// The phone verification gate.
#[derive(Debug)]
pub struct AuthGate {
    provider: Arc<dyn VerificationProvider>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    state: Mutex<GateState>,
    updates: watch::Sender<CountdownSnapshot>,
    exit_epoch: AtomicU64,
    countdown_task: Mutex<Option<AbortHandle>>,
}

impl AuthGate {
    /// Create a gate. The configuration should already be validated.
    pub fn new(
        provider: Arc<dyn VerificationProvider>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> Self {
        if config.allow_dev_fallback && !cfg!(debug_assertions) {
            tracing::error!(
                environment = %config.environment,
                "SECURITY WARNING: development OTP fallback is enabled in a release build"
            );
        }
        let (updates, _) = watch::channel(CountdownSnapshot::idle());
        Self {
            provider,
            clock,
            config,
            state: Mutex::new(GateState::default()),
            updates,
            exit_epoch: AtomicU64::new(0),
            countdown_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Receive a [`CountdownSnapshot`] on every tick and state change.
    pub fn subscribe(&self) -> watch::Receiver<CountdownSnapshot> {
        self.updates.subscribe()
    }

    /// Issue a challenge for `raw_phone`. Any existing challenge is
    /// superseded once dispatch succeeds; on failure it is left untouched.
    pub async fn request_challenge(&self, raw_phone: &str) -> Result<ChallengeSnapshot, AuthError> {
        let phone = self.config.locale.parse(raw_phone)?;
        self.issue_for(phone).await
    }

    /// Issue a new challenge to the number of the current one.
    ///
    /// Rejected while the resend cooldown is running.
    pub async fn resend(&self) -> Result<ChallengeSnapshot, AuthError> {
        let now = self.clock.now();
        let phone = {
            let state = self.state.lock();
            let current = state
                .current
                .as_ref()
                .ok_or(ChallengeError::NotFound { id: None })?;
            let remaining_secs = current.cooldown_remaining(now);
            if remaining_secs > 0 {
                return Err(ChallengeError::CooldownActive { remaining_secs }.into());
            }
            current.phone.clone()
        };
        tracing::info!(phone = %phone.masked(), "resending OTP");
        self.issue_for(phone).await
    }

    async fn issue_for(&self, phone: PhoneNumber) -> Result<ChallengeSnapshot, AuthError> {
        // The current challenge stays live until a replacement is installed,
        // so a failed dispatch keeps both its code and the resend path.
        let (provider_challenge_id, local_fallback) =
            match self.provider.send_otp(&phone.e164()).await {
                Ok(dispatch) if dispatch.accepted => (dispatch.provider_challenge_id, false),
                Ok(_) => {
                    self.fallback_or(ProviderError::Rejected {
                        provider: self.provider.name(),
                        status: 0,
                        message: "dispatch not accepted".into(),
                    })?;
                    (None, true)
                }
                Err(e) => {
                    self.fallback_or(e)?;
                    (None, true)
                }
            };

        let now = self.clock.now();
        let challenge = OtpChallenge::issue(
            phone,
            &self.config.policy,
            now,
            provider_challenge_id,
            local_fallback,
        );
        let snapshot = ChallengeSnapshot::of(&challenge, now);
        {
            let mut state = self.state.lock();
            state.retire_current();
            state.current = Some(challenge);
        }
        self.publish();

        tracing::info!(
            challenge = %snapshot.id,
            phone = %snapshot.phone.masked(),
            expires_in = snapshot.expires_in,
            local_fallback,
            "OTP challenge issued"
        );
        Ok(snapshot)
    }

    fn fallback_or(&self, error: ProviderError) -> Result<(), ProviderError> {
        if self.config.fallback_permitted() {
            tracing::warn!(
                provider = self.provider.name(),
                error = %error,
                "verification provider failed, issuing local fallback challenge"
            );
            Ok(())
        } else {
            tracing::error!(provider = self.provider.name(), error = %error, "OTP dispatch failed");
            Err(error)
        }
    }

    /// Submit `code` for challenge `id`.
    pub async fn submit_code(&self, id: ChallengeId, code: &str) -> Result<SubmitOutcome, AuthError> {
        self.config.policy.validate_code(code)?;

        let now = self.clock.now();
        let (phone, local_fallback, attempt) = {
            let mut state = self.state.lock();
            let challenge = state.live_mut(id)?;
            let started = challenge.begin_attempt(now);
            let result = match started {
                Ok(AttemptStart::AlreadyVerified) => {
                    return Ok(SubmitOutcome::Verified(VerifiedPhone::from_challenge(
                        challenge, now,
                    )))
                }
                Ok(AttemptStart::InFlight) => {
                    tracing::debug!(challenge = %id, "submission suppressed, verification in flight");
                    return Ok(SubmitOutcome::Suppressed);
                }
                Ok(AttemptStart::Started { attempt }) => {
                    Ok((challenge.phone.clone(), challenge.local_fallback, attempt))
                }
                Err(e) => Err(e),
            };
            drop(state);
            self.publish();
            result?
        };

        tracing::debug!(challenge = %id, attempt, "verifying OTP");
        let checked = if local_fallback {
            Ok(OtpCheck { verified: true })
        } else {
            self.provider.verify_otp(&phone.e164(), code).await
        };

        let now = self.clock.now();
        let outcome = {
            let mut state = self.state.lock();
            let challenge = state.settling_mut(id)?;
            match checked {
                Ok(check) => match challenge.settle(check.verified, now)? {
                    Settlement::Verified => {
                        SubmitOutcome::Verified(VerifiedPhone::from_challenge(challenge, now))
                    }
                    Settlement::Rejected { attempts_remaining } => {
                        SubmitOutcome::Rejected { attempts_remaining }
                    }
                    Settlement::Failed => SubmitOutcome::Failed,
                },
                Err(e) => {
                    challenge.abort_attempt()?;
                    drop(state);
                    self.publish();
                    tracing::warn!(challenge = %id, error = %e, "OTP verification errored, attempt refunded");
                    return Err(e.into());
                }
            }
        };
        self.publish();

        match &outcome {
            SubmitOutcome::Verified(v) => tracing::info!(
                challenge = %id,
                phone = %v.phone.masked(),
                attempt,
                "phone verified"
            ),
            SubmitOutcome::Rejected { attempts_remaining } => {
                tracing::info!(challenge = %id, attempt, attempts_remaining, "OTP rejected")
            }
            SubmitOutcome::Failed => {
                tracing::warn!(challenge = %id, attempt, "OTP challenge failed, attempts exhausted")
            }
            SubmitOutcome::Suppressed => {}
        }
        Ok(outcome)
    }

    /// Recompute expiry and cooldown, expiring a pending challenge whose
    /// window has elapsed, and publish the result.
    pub fn tick(&self) -> CountdownSnapshot {
        let now = self.clock.now();
        {
            let mut state = self.state.lock();
            if let Some(challenge) = state.current.as_mut() {
                if challenge.expire_if_due(now) {
                    tracing::info!(challenge = %challenge.id, "OTP challenge expired");
                }
            }
        }
        self.publish()
    }

    /// Leave the sub-flow. Any live challenge is superseded and a running
    /// countdown stops at its next tick.
    pub fn exit(&self) {
        self.state.lock().retire_current();
        self.exit_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.countdown_task.lock().take() {
            task.abort();
        }
        self.publish();
        tracing::debug!("left phone verification");
    }

    /// The current challenge, if any.
    pub fn snapshot(&self) -> Option<ChallengeSnapshot> {
        let now = self.clock.now();
        self.state
            .lock()
            .current
            .as_ref()
            .map(|c| ChallengeSnapshot::of(c, now))
    }

    pub(crate) fn exit_epoch(&self) -> u64 {
        self.exit_epoch.load(Ordering::SeqCst)
    }

    /// Register the countdown task, aborting any previous one.
    pub(crate) fn replace_countdown(&self, task: AbortHandle) {
        if let Some(previous) = self.countdown_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn publish(&self) -> CountdownSnapshot {
        let now = self.clock.now();
        let snapshot = match self.state.lock().current.as_ref() {
            Some(c) => CountdownSnapshot::of(c, now),
            None => CountdownSnapshot::idle(),
        };
        self.updates.send_replace(snapshot.clone());
        snapshot
    }
}
