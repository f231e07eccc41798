//! # veil-core — Foundational Types for the Onboarding Stack
//!
//! Every other crate in the workspace depends on `veil-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** `SessionKey`, `ChallengeId`,
//!    `PhoneNumber`, `WalletAddress`, `Amount` are newtypes with validated
//!    constructors. No bare strings for identifiers.
//!
//! 2. **Locale-bound phone numbers.** A `PhoneNumber` can only be built
//!    through a `PhoneLocale`, which fixes the country code and the exact
//!    national digit count.
//!
//! 3. **UTC-only timestamps.** `Timestamp` is UTC with seconds precision.
//!
//! 4. **Injected time.** Expiry windows and cooldowns read time through the
//!    `Clock` trait so that tests drive time explicitly with `ManualClock`.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `veil-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;

pub use error::ValidationError;
pub use identity::{Amount, ChallengeId, EmailAddress, PhoneLocale, PhoneNumber, SessionKey, WalletAddress};
pub use temporal::{Clock, ManualClock, SystemClock, Timestamp};
