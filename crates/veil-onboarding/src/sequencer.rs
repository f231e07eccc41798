//! # Step Sequencer
//!
//! ## Commit protocol
//!
//! 1. Take the session mutex (`tokio::sync::Mutex`, held across the write).
//! 2. Clone the committed session and apply the mutation to the clone.
//! 3. If the mutation reports `Effect::Unchanged`, return the committed
//!    session without writing.
//! 4. Otherwise `save` the clone. On success it replaces the committed
//!    session; on failure the committed session is untouched and the
//!    `PersistenceError` is returned.
//!
//! Concurrent callers therefore observe a total order of commits, and each
//! awaits its own.

use std::sync::Arc;

use tokio::sync::Mutex;
use veil_auth::VerifiedPhone;
use veil_core::{Amount, Clock, SessionKey, Timestamp, WalletAddress};
use veil_state::{
    DocumentKind, DocumentPayload, Effect, IdentityRecord, OnboardingSession, OnboardingStep,
    ProvisionedKeys, SessionError,
};
use veil_store::SessionStore;

use crate::provisioning::{KeyProvisioner, ProvisioningRequest};
use crate::OnboardingError;

/// Serialized, durable controller of one onboarding session.
#[derive(Debug)]
pub struct StepSequencer {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    session: Mutex<OnboardingSession>,
}

impl StepSequencer {
    /// Resume the session stored under `key`, or start a fresh one at
    /// `Welcome`. A fresh session is not written until its first mutation.
    pub async fn load(
        store: Arc<dyn SessionStore>,
        key: SessionKey,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, OnboardingError> {
        let session = match store.load(&key).await? {
            Some(session) => {
                tracing::info!(
                    session = %key,
                    step = %session.current_step(),
                    revision = session.revision(),
                    "resuming onboarding session"
                );
                session
            }
            None => {
                tracing::info!(session = %key, "starting new onboarding session");
                OnboardingSession::new(key, clock.now())
            }
        };
        Ok(Self {
            store,
            clock,
            session: Mutex::new(session),
        })
    }

    /// Snapshot of the committed session.
    pub async fn session(&self) -> OnboardingSession {
        self.session.lock().await.clone()
    }

    /// Current committed step.
    pub async fn current_step(&self) -> OnboardingStep {
        self.session.lock().await.current_step()
    }

    async fn mutate<F>(&self, operation: &'static str, apply: F) -> Result<OnboardingSession, OnboardingError>
    where
        F: FnOnce(&mut OnboardingSession, Timestamp) -> Result<Effect, SessionError>,
    {
        let mut committed = self.session.lock().await;
        let now = self.clock.now();
        let mut draft = committed.clone();

        match apply(&mut draft, now) {
            Ok(Effect::Unchanged) => Ok(committed.clone()),
            Ok(Effect::Applied) => {
                self.commit(&mut committed, draft, operation).await?;
                Ok(committed.clone())
            }
            Err(e) => {
                tracing::debug!(
                    session = %committed.session_key(),
                    step = %committed.current_step(),
                    operation,
                    error = %e,
                    "onboarding operation rejected"
                );
                Err(e.into())
            }
        }
    }

    async fn commit(
        &self,
        committed: &mut OnboardingSession,
        draft: OnboardingSession,
        operation: &'static str,
    ) -> Result<(), OnboardingError> {
        if let Err(e) = self.store.save(&draft).await {
            tracing::error!(
                session = %draft.session_key(),
                operation,
                error = %e,
                "failed to persist onboarding session, change discarded"
            );
            return Err(e.into());
        }
        if draft.current_step() != committed.current_step() {
            tracing::info!(
                session = %draft.session_key(),
                from = %committed.current_step(),
                to = %draft.current_step(),
                revision = draft.revision(),
                "onboarding step committed"
            );
        } else {
            tracing::debug!(
                session = %draft.session_key(),
                operation,
                revision = draft.revision(),
                "onboarding session updated"
            );
        }
        *committed = draft;
        Ok(())
    }

    /// Move to `step`: the current step (no-op) or its immediate successor.
    pub async fn set_step(&self, step: OnboardingStep) -> Result<OnboardingSession, OnboardingError> {
        self.mutate("set_step", |s, now| s.set_step(step, now)).await
    }

    /// Advance to the immediate successor.
    pub async fn next_step(&self) -> Result<OnboardingSession, OnboardingError> {
        self.mutate("next_step", |s, now| s.next_step(now)).await
    }

    /// Record the phone number proven by the gate.
    pub async fn confirm_phone(&self, verified: &VerifiedPhone) -> Result<OnboardingSession, OnboardingError> {
        let confirmation = verified.to_confirmation();
        self.mutate("confirm_phone", |s, now| s.confirm_phone(confirmation, now))
            .await
    }

    /// Bind the wallet reported by the wallet-connect collaborator.
    pub async fn set_wallet_connection(
        &self,
        address: &str,
        balance: &str,
        wallet_type: &str,
    ) -> Result<OnboardingSession, OnboardingError> {
        let address = WalletAddress::new(address)?;
        let balance = Amount::new(balance)?;
        self.mutate("set_wallet_connection", |s, now| {
            s.set_wallet_connection(address, balance, wallet_type, now)
        })
        .await
    }

    /// Store the identity record from the KYC capture collaborator.
    pub async fn set_kyc_data(&self, record: IdentityRecord) -> Result<OnboardingSession, OnboardingError> {
        self.mutate("set_kyc_data", |s, now| s.set_kyc_data(record, now))
            .await
    }

    /// Append one captured document.
    pub async fn capture_document(
        &self,
        kind: DocumentKind,
        payload: DocumentPayload,
    ) -> Result<OnboardingSession, OnboardingError> {
        self.mutate("capture_document", |s, now| s.capture_document(kind, payload, now))
            .await
    }

    /// Validate the identity record and mark KYC complete.
    pub async fn complete_kyc(&self) -> Result<OnboardingSession, OnboardingError> {
        self.mutate("complete_kyc", |s, now| s.complete_kyc(now))
            .await
    }

    /// Invoke the key-provisioning collaborator and store its receipt.
    ///
    /// Requires `KeyProvisioning` with KYC completed. When keys were already
    /// provisioned the stored receipt is returned without calling out.
    pub async fn provision_keys(
        &self,
        provisioner: &dyn KeyProvisioner,
    ) -> Result<ProvisionedKeys, OnboardingError> {
        let mut committed = self.session.lock().await;
        if let Some(keys) = committed.provisioned_keys() {
            return Ok(keys.clone());
        }
        committed.check_provisioning_ready()?;

        let request = ProvisioningRequest {
            session_key: committed.session_key().clone(),
            phone: committed.verified_phone().map(|c| c.phone.clone()),
            wallet_address: committed.wallet().map(|w| w.address.clone()),
            requested_at: self.clock.now(),
        };
        let keys = provisioner.provision(&request).await.map_err(|e| {
            tracing::warn!(session = %request.session_key, error = %e, "key provisioning failed");
            e
        })?;

        let mut draft = committed.clone();
        draft.record_provisioned_keys(keys.clone(), self.clock.now())?;
        self.commit(&mut committed, draft, "provision_keys").await?;
        Ok(keys)
    }

    /// Discard all progress and return to `Welcome`.
    pub async fn reset_onboarding(&self) -> Result<OnboardingSession, OnboardingError> {
        let mut committed = self.session.lock().await;
        let fresh = committed.reset(self.clock.now());
        tracing::info!(
            session = %committed.session_key(),
            from = %committed.current_step(),
            "resetting onboarding"
        );
        self.commit(&mut committed, fresh, "reset_onboarding").await?;
        Ok(committed.clone())
    }
}
