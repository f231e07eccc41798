//! # veil-state — Onboarding State Machines
//!
//! Pure, synchronous state machines. Nothing in this crate performs I/O or
//! reads the clock: every operation takes the current [`Timestamp`] as an
//! argument, and persistence and provider calls live in the crates above.
//!
//! ## State Machines
//!
//! - **Step** (`step.rs`): `Welcome → PhoneVerification → WalletBinding →
//!   Kyc → KeyProvisioning → Complete`, strictly forward, with `Complete`
//!   terminal.
//!
//! - **Session** (`session.rs`): the persisted onboarding record. Applies
//!   step preconditions and field-level gating, and keeps an append-only
//!   transition log.
//!
//! - **Challenge** (`challenge.rs`): one OTP challenge as a single status
//!   variable with an explicit transition table
//!   (`Pending → Verifying → Verified | Failed`, `Expired` on timeout or
//!   supersession), attempt bound, expiry window and resend cooldown.
//!
//! - **KYC** (`kyc.rs`): captured identity data and its completeness check.
//!
//! [`Timestamp`]: veil_core::Timestamp

pub mod challenge;
pub mod kyc;
pub mod session;
pub mod step;

pub use challenge::{
    AttemptStart, ChallengeError, ChallengePolicy, ChallengeStatus, OtpChallenge, Settlement,
};
pub use kyc::{DocumentCapture, DocumentKind, DocumentPayload, ExtractedData, IdentityRecord, KycError};
pub use session::{
    Effect, OnboardingSession, PhoneConfirmation, ProvisionedKeys, SessionError, WalletBinding,
    SESSION_SCHEMA_VERSION,
};
pub use step::{OnboardingStep, TransitionError, TransitionRecord};
