//! # Onboarding Step Sequence
//!
//! ## States
//!
//! ```text
//! Welcome ──▶ PhoneVerification ──▶ WalletBinding ──▶ Kyc ──▶ KeyProvisioning ──▶ Complete
//!    ▲                                                                               │
//!    └──────────────────────────── reset (explicit only) ────────────────────────────┘
//! ```
//!
//! ## Design Decision
//!
//! The sequence is a runtime enum with a validated `next()` rather than six
//! typestate types. The session is always loaded from storage, so the step
//! is never known at compile time, and the only legal move is "one forward"
//! which a single table expresses completely.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use veil_core::Timestamp;

/// A step of the onboarding flow, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingStep {
    /// First launch, nothing captured yet.
    Welcome,
    /// Phone ownership is being proven with an OTP challenge.
    PhoneVerification,
    /// Waiting for the wallet-binding collaborator.
    WalletBinding,
    /// Identity capture and validation.
    Kyc,
    /// Key material is being provisioned.
    KeyProvisioning,
    /// Onboarding finished. Terminal.
    Complete,
}

impl OnboardingStep {
    /// All steps in canonical order.
    pub const ALL: [OnboardingStep; 6] = [
        Self::Welcome,
        Self::PhoneVerification,
        Self::WalletBinding,
        Self::Kyc,
        Self::KeyProvisioning,
        Self::Complete,
    ];

    /// Canonical state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome => "WELCOME",
            Self::PhoneVerification => "PHONE_VERIFICATION",
            Self::WalletBinding => "WALLET_BINDING",
            Self::Kyc => "KYC",
            Self::KeyProvisioning => "KEY_PROVISIONING",
            Self::Complete => "COMPLETE",
        }
    }

    /// Zero-based position in the canonical order.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// The immediate successor, or `None` for `Complete`.
    pub fn next(&self) -> Option<OnboardingStep> {
        Self::ALL.get(self.ordinal() + 1).copied()
    }

    /// Steps reachable by a single forward transition.
    pub fn valid_transitions(&self) -> &'static [OnboardingStep] {
        match self {
            Self::Welcome => &[Self::PhoneVerification],
            Self::PhoneVerification => &[Self::WalletBinding],
            Self::WalletBinding => &[Self::Kyc],
            Self::Kyc => &[Self::KeyProvisioning],
            Self::KeyProvisioning => &[Self::Complete],
            Self::Complete => &[],
        }
    }

    /// Whether this step is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Whether `self` is at or beyond `other` in canonical order.
    pub fn has_reached(&self, other: OnboardingStep) -> bool {
        *self >= other
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded step change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Step before the transition.
    pub from: OnboardingStep,
    /// Step after the transition.
    pub to: OnboardingStep,
    /// When the transition was committed.
    pub timestamp: Timestamp,
    /// Human-readable reason.
    pub reason: Option<String>,
}

/// Illegal step jump, unmet precondition, or operation attempted at the
/// wrong point of the flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Target is neither the current step nor its immediate successor.
    #[error("invalid onboarding transition: {from} -> {to}")]
    InvalidTransition {
        /// Current step.
        from: OnboardingStep,
        /// Requested step.
        to: OnboardingStep,
    },

    /// Target is the successor but its entry condition does not hold.
    #[error("cannot leave {from} for {to}: {reason}")]
    PreconditionUnmet {
        /// Current step.
        from: OnboardingStep,
        /// Requested step.
        to: OnboardingStep,
        /// The unmet condition.
        reason: &'static str,
    },

    /// A field-level operation was attempted at a step that does not allow it.
    #[error("{operation} is not allowed at step {current}")]
    OperationNotAllowed {
        /// The rejected operation.
        operation: &'static str,
        /// Current step.
        current: OnboardingStep,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_is_forward_only() {
        for pair in OnboardingStep::ALL.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert_eq!(pair[0].valid_transitions(), &[pair[1]]);
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(OnboardingStep::Complete.next(), None);
        assert!(OnboardingStep::Complete.valid_transitions().is_empty());
    }

    #[test]
    fn only_complete_is_terminal() {
        for step in OnboardingStep::ALL {
            assert_eq!(step.is_terminal(), step == OnboardingStep::Complete);
        }
    }

    #[test]
    fn has_reached_follows_order() {
        assert!(OnboardingStep::Kyc.has_reached(OnboardingStep::WalletBinding));
        assert!(OnboardingStep::Kyc.has_reached(OnboardingStep::Kyc));
        assert!(!OnboardingStep::WalletBinding.has_reached(OnboardingStep::Kyc));
    }

    #[test]
    fn serde_names_match_display() {
        for step in OnboardingStep::ALL {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.name()));
            let parsed: OnboardingStep = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, step);
        }
    }
}
