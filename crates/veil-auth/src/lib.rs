//! # veil-auth — Phone Verification Gate
//!
//! Drives the OTP challenge state machine from `veil-state` against an
//! external verification provider and hands the caller a [`VerifiedPhone`]
//! when a code is accepted.
//!
//! ## Modules
//!
//! - `gate`: [`AuthGate`], the sub-flow controller (`request_challenge`,
//!   `submit_code`, `resend`, `tick`, `exit`, `snapshot`).
//! - `countdown`: the one-second ticker publishing [`CountdownSnapshot`]s.
//! - `entry`: [`CodeEntry`], the auto-submitting digit buffer.
//! - `provider`: the [`VerificationProvider`] trait and test providers.
//! - `twilio`: [`TwilioVerifyProvider`], the Twilio Verify v2 adapter.
//! - `config`: [`AuthConfig`] loaded from `VEIL_*` environment variables.

pub mod config;
pub mod countdown;
pub mod entry;
pub mod gate;
pub mod provider;
pub mod twilio;

pub use config::{AuthConfig, ConfigError, DeploymentEnvironment};
pub use countdown::{spawn_countdown, spawn_countdown_every, CountdownHandle, CountdownSnapshot};
pub use entry::CodeEntry;
pub use gate::{AuthError, AuthGate, ChallengeSnapshot, SubmitOutcome, VerifiedPhone, SUPERSEDED_MEMORY};
pub use provider::{
    MockVerificationProvider, OtpCheck, OtpDispatch, ProviderError, UnavailableProvider,
    VerificationPause, VerificationProvider,
};
pub use twilio::{TwilioConfig, TwilioVerifyProvider};
