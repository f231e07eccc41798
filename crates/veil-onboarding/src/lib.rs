//! # veil-onboarding — Step Sequencer
//!
//! [`StepSequencer`] owns one [`OnboardingSession`](veil_state::OnboardingSession)
//! and is the only writer of it. Every mutation is applied to a copy,
//! written to the injected [`SessionStore`](veil_store::SessionStore), and
//! only then made visible. A failed write blocks the transition, and a
//! restarted sequencer resumes at the last committed step.

pub mod provisioning;
pub mod sequencer;

pub use provisioning::{KeyProvisioner, MockKeyProvisioner, ProvisioningError, ProvisioningRequest};
pub use sequencer::StepSequencer;

use veil_core::ValidationError;
use veil_state::{KycError, SessionError, TransitionError};
use veil_store::PersistenceError;

/// Errors from sequencer operations.
#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    /// Illegal step change or operation at the wrong step.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// KYC completion with missing fields.
    #[error(transparent)]
    Kyc(#[from] KycError),

    /// Malformed input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store rejected the write; nothing was committed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The key-provisioning collaborator failed.
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),
}

impl From<SessionError> for OnboardingError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Transition(e) => Self::Transition(e),
            SessionError::Kyc(e) => Self::Kyc(e),
            SessionError::Validation(e) => Self::Validation(e),
        }
    }
}
