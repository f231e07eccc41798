//! # OTP Challenge Lifecycle
//!
//! One issued, time-bounded phone-verification challenge.
//!
//! ## Allowed Transitions
//!
//! ```text
//!            begin_attempt()             settle(true)
//! Pending ────────────────▶ Verifying ───────────────▶ Verified
//!    │  ▲                      │   │
//!    │  └── settle(false) ─────┘   └── settle(false), attempts exhausted ──▶ Failed
//!    │      abort_attempt()        │
//!    │                             └── supersede() ──▶ Expired
//!    └── expiry / supersede() ─────────────────────────▶ Expired
//! ```
//!
//! `Verified`, `Expired` and `Failed` are terminal. The status is a single
//! variable checked against [`ChallengeStatus::valid_transitions`] on every
//! change, so "verifying while failed" and similar combinations cannot be
//! represented.
//!
//! Expiry and resend cooldown are independent: expiry governs whether the
//! current code may still be submitted, cooldown governs when a new code may
//! be requested.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use veil_core::{ChallengeId, PhoneNumber, Timestamp, ValidationError};

/// Tunables for challenge issuance and verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePolicy {
    /// Number of digits in a code.
    pub code_length: usize,
    /// Seconds a challenge accepts submissions after issuance.
    pub expiry_secs: u64,
    /// Seconds after issuance before a resend is allowed.
    pub cooldown_secs: u64,
    /// Submissions allowed before the challenge fails. Always finite.
    pub max_attempts: u32,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            code_length: 6,
            expiry_secs: 30,
            cooldown_secs: 30,
            max_attempts: 5,
        }
    }
}

impl ChallengePolicy {
    /// Check that `code` is exactly `code_length` ASCII digits.
    pub fn validate_code(&self, code: &str) -> Result<(), ValidationError> {
        if code.len() == self.code_length && code.chars().all(|c| c.is_ascii_digit()) {
            Ok(())
        } else {
            Err(ValidationError::InvalidCode {
                expected_len: self.code_length,
            })
        }
    }
}

/// Status of one challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    /// Code sent, awaiting submission.
    Pending,
    /// A submission is being checked.
    Verifying,
    /// Code accepted. Terminal.
    Verified,
    /// Timed out or superseded. Terminal.
    Expired,
    /// Attempt bound reached. Terminal.
    Failed,
}

impl ChallengeStatus {
    /// Canonical state name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verifying => "VERIFYING",
            Self::Verified => "VERIFIED",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        }
    }

    /// Statuses reachable in one transition.
    pub fn valid_transitions(&self) -> &'static [ChallengeStatus] {
        match self {
            Self::Pending => &[Self::Verifying, Self::Expired],
            Self::Verifying => &[Self::Pending, Self::Verified, Self::Failed, Self::Expired],
            Self::Verified | Self::Expired | Self::Failed => &[],
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Challenge-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    /// No challenge with this id was ever issued to the gate, or nothing
    /// was issued at all (`id` is `None`).
    #[error("no such challenge{}", id.map(|id| format!(": {id}")).unwrap_or_default())]
    NotFound {
        /// The unknown id.
        id: Option<ChallengeId>,
    },

    /// The challenge timed out or was superseded by a newer one.
    #[error("challenge {id} has expired")]
    Expired {
        /// The expired challenge.
        id: ChallengeId,
    },

    /// The attempt bound was reached; a new challenge is required.
    #[error("challenge {id} failed after {max_attempts} attempts")]
    AttemptsExceeded {
        /// The failed challenge.
        id: ChallengeId,
        /// The bound that was reached.
        max_attempts: u32,
    },

    /// A resend was requested before the cooldown elapsed.
    #[error("resend available in {remaining_secs}s")]
    CooldownActive {
        /// Seconds until resend is allowed.
        remaining_secs: u64,
    },

    /// Internal guard: a status change outside the transition table.
    #[error("illegal challenge status change {from} -> {to}")]
    IllegalStatusChange {
        /// Current status.
        from: ChallengeStatus,
        /// Rejected status.
        to: ChallengeStatus,
    },
}

/// Result of starting a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStart {
    /// Attempt counted; the caller must now verify and [`OtpChallenge::settle`].
    Started {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Another submission is already being verified.
    InFlight,
    /// The challenge is already verified; nothing to do.
    AlreadyVerified,
}

/// Result of settling a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Code accepted.
    Verified,
    /// Code rejected, the challenge is still open.
    Rejected {
        /// Submissions left before the challenge fails.
        attempts_remaining: u32,
    },
    /// Code rejected and the attempt bound was reached.
    Failed,
}

/// One issued OTP challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpChallenge {
    /// Unique id of this issuance.
    pub id: ChallengeId,
    /// Normalized phone number the code was sent to.
    pub phone: PhoneNumber,
    /// Current status.
    status: ChallengeStatus,
    /// When the challenge was issued.
    pub issued_at: Timestamp,
    /// End of the submission window.
    pub expires_at: Timestamp,
    /// Earliest instant a resend is allowed.
    pub cooldown_until: Timestamp,
    /// Submissions counted so far.
    attempt_count: u32,
    /// Attempt bound.
    pub max_attempts: u32,
    /// Provider-side reference, when the provider returned one.
    pub provider_challenge_id: Option<String>,
    /// Issued locally because the provider was unavailable (non-production only).
    pub local_fallback: bool,
    /// When the code was accepted.
    pub verified_at: Option<Timestamp>,
}

impl OtpChallenge {
    /// Issue a new challenge at `now` under `policy`.
    pub fn issue(
        phone: PhoneNumber,
        policy: &ChallengePolicy,
        now: Timestamp,
        provider_challenge_id: Option<String>,
        local_fallback: bool,
    ) -> Self {
        Self {
            id: ChallengeId::new(),
            phone,
            status: ChallengeStatus::Pending,
            issued_at: now,
            expires_at: now.plus_secs(policy.expiry_secs),
            cooldown_until: now.plus_secs(policy.cooldown_secs),
            attempt_count: 0,
            max_attempts: policy.max_attempts.max(1),
            provider_challenge_id,
            local_fallback,
            verified_at: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> ChallengeStatus {
        self.status
    }

    /// Submissions counted so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Seconds of validity left at `now`.
    pub fn expires_in(&self, now: Timestamp) -> u64 {
        now.secs_until(&self.expires_at)
    }

    /// Seconds until a resend is allowed at `now`.
    pub fn cooldown_remaining(&self, now: Timestamp) -> u64 {
        now.secs_until(&self.cooldown_until)
    }

    fn transition(&mut self, to: ChallengeStatus) -> Result<(), ChallengeError> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(ChallengeError::IllegalStatusChange {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Expire a pending challenge whose window has elapsed. Returns whether it expired.
    pub fn expire_if_due(&mut self, now: Timestamp) -> bool {
        self.status == ChallengeStatus::Pending
            && now >= self.expires_at
            && self.transition(ChallengeStatus::Expired).is_ok()
    }

    /// Invalidate this challenge because a newer one was issued or the
    /// sub-flow was exited. Terminal challenges are left as they are.
    pub fn supersede(&mut self) {
        if !self.status.is_terminal() {
            // Pending and Verifying both list Expired as a successor.
            let _ = self.transition(ChallengeStatus::Expired);
        }
    }

    /// Start a submission at `now`.
    ///
    /// Counts an attempt and enters `Verifying` only from `Pending` inside
    /// the expiry window.
    pub fn begin_attempt(&mut self, now: Timestamp) -> Result<AttemptStart, ChallengeError> {
        match self.status {
            ChallengeStatus::Verified => Ok(AttemptStart::AlreadyVerified),
            ChallengeStatus::Verifying => Ok(AttemptStart::InFlight),
            ChallengeStatus::Failed => Err(ChallengeError::AttemptsExceeded {
                id: self.id,
                max_attempts: self.max_attempts,
            }),
            ChallengeStatus::Expired => Err(ChallengeError::Expired { id: self.id }),
            ChallengeStatus::Pending => {
                if self.expire_if_due(now) {
                    return Err(ChallengeError::Expired { id: self.id });
                }
                self.transition(ChallengeStatus::Verifying)?;
                self.attempt_count += 1;
                Ok(AttemptStart::Started {
                    attempt: self.attempt_count,
                })
            }
        }
    }

    /// Settle the in-flight submission with the verifier's answer.
    ///
    /// Fails with `Expired` if the challenge was superseded while the
    /// verification was in flight.
    pub fn settle(&mut self, accepted: bool, now: Timestamp) -> Result<Settlement, ChallengeError> {
        match self.status {
            ChallengeStatus::Verifying => {}
            ChallengeStatus::Expired => return Err(ChallengeError::Expired { id: self.id }),
            other => {
                return Err(ChallengeError::IllegalStatusChange {
                    from: other,
                    to: if accepted {
                        ChallengeStatus::Verified
                    } else {
                        ChallengeStatus::Pending
                    },
                })
            }
        }

        if accepted {
            self.transition(ChallengeStatus::Verified)?;
            self.verified_at = Some(now);
            return Ok(Settlement::Verified);
        }

        if self.attempt_count >= self.max_attempts {
            self.transition(ChallengeStatus::Failed)?;
            Ok(Settlement::Failed)
        } else {
            self.transition(ChallengeStatus::Pending)?;
            Ok(Settlement::Rejected {
                attempts_remaining: self.max_attempts - self.attempt_count,
            })
        }
    }

    /// Undo the in-flight submission after the verifier itself failed.
    ///
    /// The attempt is not charged to the user.
    pub fn abort_attempt(&mut self) -> Result<(), ChallengeError> {
        if self.status == ChallengeStatus::Expired {
            return Err(ChallengeError::Expired { id: self.id });
        }
        self.transition(ChallengeStatus::Pending)?;
        self.attempt_count = self.attempt_count.saturating_sub(1);
        Ok(())
    }
}
