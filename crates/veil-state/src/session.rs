//! # Onboarding Session
//!
//! The persisted record of one device's progress through onboarding.
//!
//! Every mutating method takes the current time, validates against the
//! current step, and returns an [`Effect`]. `Effect::Unchanged` means the
//! call was a legal no-op (same value, or the session is already
//! `Complete`) and nothing needs to be written. `Effect::Applied` means the
//! session changed, the revision was bumped and `updated_at` moved forward.
//!
//! ## Field gating
//!
//! | Operation                | Allowed at                               |
//! |--------------------------|------------------------------------------|
//! | `confirm_phone`          | PhoneVerification                        |
//! | `set_wallet_connection`  | WalletBinding, Kyc, KeyProvisioning      |
//! | `set_kyc_data`           | Kyc                                      |
//! | `capture_document`       | Kyc                                      |
//! | `complete_kyc`           | Kyc (no-op at KeyProvisioning)           |
//! | `record_provisioned_keys`| KeyProvisioning, after KYC completion    |
//!
//! Once `Complete` is reached every mutation except [`OnboardingSession::reset`]
//! returns `Effect::Unchanged`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use veil_core::{
    Amount, ChallengeId, PhoneNumber, SessionKey, Timestamp, ValidationError, WalletAddress,
};

use crate::kyc::{DocumentKind, DocumentPayload, IdentityRecord, KycError};
use crate::step::{OnboardingStep, TransitionError, TransitionRecord};

/// Version of the persisted session document.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

/// Whether a mutation changed the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The session changed and must be persisted.
    Applied,
    /// Legal no-op.
    Unchanged,
}

impl Effect {
    /// Whether the session changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Errors from session mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Illegal step change or operation at the wrong step.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// KYC completion with missing fields.
    #[error(transparent)]
    Kyc(#[from] KycError),

    /// Malformed input value.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A phone number proven by a verified OTP challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneConfirmation {
    /// The verified number.
    pub phone: PhoneNumber,
    /// Challenge that proved it.
    pub challenge_id: ChallengeId,
    /// When the challenge was verified.
    pub verified_at: Timestamp,
}

/// Wallet details supplied by the wallet-binding collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBinding {
    /// Wallet address.
    pub address: WalletAddress,
    /// Balance reported at binding time.
    pub balance: Amount,
    /// Wallet kind as reported by the connector.
    pub wallet_type: String,
    /// When the binding was last changed.
    pub bound_at: Timestamp,
}

impl WalletBinding {
    fn same_values(&self, address: &WalletAddress, balance: &Amount, wallet_type: &str) -> bool {
        &self.address == address && &self.balance == balance && self.wallet_type == wallet_type
    }
}

/// Receipt returned by the key-provisioning collaborator.
///
/// Holds public references only. Secret key material never enters the
/// session document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedKeys {
    /// Collaborator-side identifier of the key set.
    pub key_reference: String,
    /// Public key, encoded by the collaborator.
    pub public_key: String,
    /// When provisioning completed.
    pub provisioned_at: Timestamp,
}

/// Persisted onboarding state for one device or user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingSession {
    session_key: SessionKey,
    schema_version: u32,
    current_step: OnboardingStep,
    verified_phone: Option<PhoneConfirmation>,
    wallet: Option<WalletBinding>,
    kyc_record: Option<IdentityRecord>,
    is_kyc_completed: bool,
    provisioned_keys: Option<ProvisionedKeys>,
    #[serde(default)]
    transition_log: Vec<TransitionRecord>,
    revision: u64,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl OnboardingSession {
    /// A fresh session at `Welcome`.
    pub fn new(session_key: SessionKey, now: Timestamp) -> Self {
        Self {
            session_key,
            schema_version: SESSION_SCHEMA_VERSION,
            current_step: OnboardingStep::Welcome,
            verified_phone: None,
            wallet: None,
            kyc_record: None,
            is_kyc_completed: false,
            provisioned_keys: None,
            transition_log: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn current_step(&self) -> OnboardingStep {
        self.current_step
    }

    pub fn verified_phone(&self) -> Option<&PhoneConfirmation> {
        self.verified_phone.as_ref()
    }

    pub fn wallet(&self) -> Option<&WalletBinding> {
        self.wallet.as_ref()
    }

    pub fn kyc_record(&self) -> Option<&IdentityRecord> {
        self.kyc_record.as_ref()
    }

    pub fn is_kyc_completed(&self) -> bool {
        self.is_kyc_completed
    }

    pub fn provisioned_keys(&self) -> Option<&ProvisionedKeys> {
        self.provisioned_keys.as_ref()
    }

    /// Every step change, oldest first.
    pub fn transition_log(&self) -> &[TransitionRecord] {
        &self.transition_log
    }

    /// Number of committed mutations.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Whether onboarding has finished.
    pub fn is_complete(&self) -> bool {
        self.current_step.is_terminal()
    }

    // ── Step transitions ─────────────────────────────────────────────

    /// Advance to the immediate successor if its entry condition holds.
    pub fn next_step(&mut self, now: Timestamp) -> Result<Effect, SessionError> {
        let Some(to) = self.current_step.next() else {
            return Ok(Effect::Unchanged);
        };
        self.check_precondition(to)?;
        self.advance(to, now, "next_step");
        Ok(Effect::Applied)
    }

    /// Move to `step`, which must be the current step (no-op) or its
    /// immediate successor. `Welcome` is reachable only through [`reset`](Self::reset).
    pub fn set_step(&mut self, step: OnboardingStep, now: Timestamp) -> Result<Effect, SessionError> {
        if self.is_complete() || step == self.current_step {
            return Ok(Effect::Unchanged);
        }
        if !self.current_step.valid_transitions().contains(&step) {
            return Err(TransitionError::InvalidTransition {
                from: self.current_step,
                to: step,
            }
            .into());
        }
        self.check_precondition(step)?;
        self.advance(step, now, "set_step");
        Ok(Effect::Applied)
    }

    fn check_precondition(&self, to: OnboardingStep) -> Result<(), TransitionError> {
        let unmet = match to {
            OnboardingStep::WalletBinding if self.verified_phone.is_none() => {
                Some("phone number has not been verified")
            }
            OnboardingStep::Kyc if self.wallet.is_none() => Some("no wallet is bound"),
            OnboardingStep::KeyProvisioning if !self.is_kyc_completed => {
                Some("KYC has not been completed")
            }
            OnboardingStep::Complete if self.provisioned_keys.is_none() => {
                Some("keys have not been provisioned")
            }
            _ => None,
        };
        match unmet {
            Some(reason) => Err(TransitionError::PreconditionUnmet {
                from: self.current_step,
                to,
                reason,
            }),
            None => Ok(()),
        }
    }

    fn advance(&mut self, to: OnboardingStep, now: Timestamp, reason: &str) {
        let from = self.current_step;
        self.current_step = to;
        self.transition_log.push(TransitionRecord {
            from,
            to,
            timestamp: now,
            reason: Some(reason.to_string()),
        });
        self.commit(now);
    }

    fn commit(&mut self, now: Timestamp) {
        self.revision += 1;
        self.updated_at = self.updated_at.max(now);
    }

    fn require_step(
        &self,
        operation: &'static str,
        allowed: &[OnboardingStep],
    ) -> Result<(), TransitionError> {
        if allowed.contains(&self.current_step) {
            Ok(())
        } else {
            Err(TransitionError::OperationNotAllowed {
                operation,
                current: self.current_step,
            })
        }
    }

    // ── Field mutations ──────────────────────────────────────────────

    /// Record the phone number proven by a verified challenge.
    pub fn confirm_phone(
        &mut self,
        confirmation: PhoneConfirmation,
        now: Timestamp,
    ) -> Result<Effect, SessionError> {
        if self.is_complete() {
            return Ok(Effect::Unchanged);
        }
        self.require_step("confirm_phone", &[OnboardingStep::PhoneVerification])?;
        if self
            .verified_phone
            .as_ref()
            .is_some_and(|existing| existing.phone == confirmation.phone)
        {
            return Ok(Effect::Unchanged);
        }
        self.verified_phone = Some(confirmation);
        self.commit(now);
        Ok(Effect::Applied)
    }

    /// Bind or re-bind the wallet.
    pub fn set_wallet_connection(
        &mut self,
        address: WalletAddress,
        balance: Amount,
        wallet_type: &str,
        now: Timestamp,
    ) -> Result<Effect, SessionError> {
        if self.is_complete() {
            return Ok(Effect::Unchanged);
        }
        self.require_step(
            "set_wallet_connection",
            &[
                OnboardingStep::WalletBinding,
                OnboardingStep::Kyc,
                OnboardingStep::KeyProvisioning,
            ],
        )?;
        let wallet_type = wallet_type.trim();
        if wallet_type.is_empty() {
            return Err(ValidationError::BlankField("wallet_type").into());
        }
        if self
            .wallet
            .as_ref()
            .is_some_and(|w| w.same_values(&address, &balance, wallet_type))
        {
            return Ok(Effect::Unchanged);
        }
        self.wallet = Some(WalletBinding {
            address,
            balance,
            wallet_type: wallet_type.to_string(),
            bound_at: now,
        });
        self.commit(now);
        Ok(Effect::Applied)
    }

    /// Replace the identity record. KYC must be completed again afterwards.
    pub fn set_kyc_data(
        &mut self,
        mut record: IdentityRecord,
        now: Timestamp,
    ) -> Result<Effect, SessionError> {
        if self.is_complete() {
            return Ok(Effect::Unchanged);
        }
        self.require_step("set_kyc_data", &[OnboardingStep::Kyc])?;
        record.verified = false;
        record.verification_date = None;
        if record.phone_number.is_none() {
            record.phone_number = self.verified_phone.as_ref().map(|c| c.phone.clone());
        }
        if !self.is_kyc_completed && self.kyc_record.as_ref() == Some(&record) {
            return Ok(Effect::Unchanged);
        }
        self.kyc_record = Some(record);
        self.is_kyc_completed = false;
        self.commit(now);
        Ok(Effect::Applied)
    }

    /// Append a captured document to the identity record, creating it if needed.
    pub fn capture_document(
        &mut self,
        kind: DocumentKind,
        payload: DocumentPayload,
        now: Timestamp,
    ) -> Result<Effect, SessionError> {
        if self.is_complete() {
            return Ok(Effect::Unchanged);
        }
        self.require_step("capture_document", &[OnboardingStep::Kyc])?;
        let phone = self.verified_phone.as_ref().map(|c| c.phone.clone());
        let record = self.kyc_record.get_or_insert_with(|| IdentityRecord {
            phone_number: phone,
            ..Default::default()
        });
        record.capture_document(kind, payload, now);
        self.is_kyc_completed = false;
        self.commit(now);
        Ok(Effect::Applied)
    }

    /// Validate the identity record and mark KYC complete.
    ///
    /// On `IncompleteData` nothing changes.
    pub fn complete_kyc(&mut self, now: Timestamp) -> Result<Effect, SessionError> {
        if self.current_step.has_reached(OnboardingStep::KeyProvisioning) {
            return Ok(Effect::Unchanged);
        }
        self.require_step("complete_kyc", &[OnboardingStep::Kyc])?;
        if self.is_kyc_completed {
            return Ok(Effect::Unchanged);
        }
        let Some(record) = self.kyc_record.as_mut() else {
            return Err(KycError::IncompleteData {
                missing: IdentityRecord::default().missing_fields(),
            }
            .into());
        };
        record.validate()?;
        record.mark_verified(now);
        self.is_kyc_completed = true;
        self.commit(now);
        Ok(Effect::Applied)
    }

    /// Check that key provisioning may be invoked now.
    pub fn check_provisioning_ready(&self) -> Result<(), TransitionError> {
        self.require_step("provision_keys", &[OnboardingStep::KeyProvisioning])?;
        if !self.is_kyc_completed {
            return Err(TransitionError::PreconditionUnmet {
                from: self.current_step,
                to: OnboardingStep::Complete,
                reason: "KYC has not been completed",
            });
        }
        Ok(())
    }

    /// Store the provisioning receipt. A session holds at most one.
    pub fn record_provisioned_keys(
        &mut self,
        keys: ProvisionedKeys,
        now: Timestamp,
    ) -> Result<Effect, SessionError> {
        if self.is_complete() || self.provisioned_keys.is_some() {
            return Ok(Effect::Unchanged);
        }
        self.check_provisioning_ready()?;
        self.provisioned_keys = Some(keys);
        self.commit(now);
        Ok(Effect::Applied)
    }

    /// A fresh `Welcome` session under the same key.
    ///
    /// The revision keeps counting so a reset is never mistaken for an
    /// older document, and the new log opens with the reset itself.
    pub fn reset(&self, now: Timestamp) -> OnboardingSession {
        let mut fresh = OnboardingSession::new(self.session_key.clone(), now);
        fresh.revision = self.revision + 1;
        fresh.updated_at = self.updated_at.max(now);
        fresh.transition_log.push(TransitionRecord {
            from: self.current_step,
            to: OnboardingStep::Welcome,
            timestamp: now,
            reason: Some("reset".to_string()),
        });
        fresh
    }
}
