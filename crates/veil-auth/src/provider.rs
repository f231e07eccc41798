//! # Verification Provider Interface
//!
//! The [`VerificationProvider`] trait abstracts over the service that sends
//! OTP codes and decides whether a submitted code is correct. In production
//! the provider is the only source of truth for a verified phone.
//!
//! ## Implementations
//!
//! - [`TwilioVerifyProvider`](crate::twilio::TwilioVerifyProvider): Twilio
//!   Verify v2 over HTTP.
//! - [`UnavailableProvider`]: always fails. Wires the development fallback
//!   path when no provider credentials exist.
//! - [`MockVerificationProvider`]: scripted provider for tests, with
//!   failure switches and a pause hook for holding a verification in flight.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Errors from the verification provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider unreachable or returned a 5xx status.
    #[error("{provider} unavailable: {reason}")]
    Unavailable {
        /// Provider name.
        provider: &'static str,
        /// Transport or server error.
        reason: String,
    },

    /// Provider refused the request.
    #[error("{provider} rejected the request (HTTP {status}): {message}")]
    Rejected {
        /// Provider name.
        provider: &'static str,
        /// HTTP status, or 0 when the refusal was in the response body.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// The request timed out.
    #[error("{provider} request timed out")]
    Timeout {
        /// Provider name.
        provider: &'static str,
    },

    /// The response could not be understood.
    #[error("{provider} returned an unreadable response: {reason}")]
    InvalidResponse {
        /// Provider name.
        provider: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// The provider has no credentials.
    #[error("verification provider not configured: {reason}")]
    NotConfigured {
        /// What is missing.
        reason: String,
    },
}

/// Result of dispatching a code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpDispatch {
    /// Whether the provider accepted the dispatch request.
    pub accepted: bool,
    /// Provider-side reference for the verification, if any.
    pub provider_challenge_id: Option<String>,
}

/// Result of checking a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpCheck {
    /// Whether the code was correct.
    pub verified: bool,
}

/// External OTP dispatch and verification service.
#[async_trait]
pub trait VerificationProvider: Send + Sync + std::fmt::Debug {
    /// Short provider name for logs and errors.
    fn name(&self) -> &'static str;

    /// Send a fresh code to `phone_e164`.
    async fn send_otp(&self, phone_e164: &str) -> Result<OtpDispatch, ProviderError>;

    /// Check `code` for `phone_e164`.
    async fn verify_otp(&self, phone_e164: &str, code: &str) -> Result<OtpCheck, ProviderError>;
}

// ─── Unavailable ────────────────────────────────────────────────────────

/// Provider that always fails.
#[derive(Debug, Clone, Default)]
pub struct UnavailableProvider;

#[async_trait]
impl VerificationProvider for UnavailableProvider {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn send_otp(&self, _phone_e164: &str) -> Result<OtpDispatch, ProviderError> {
        Err(ProviderError::NotConfigured {
            reason: "no verification provider configured".into(),
        })
    }

    async fn verify_otp(&self, _phone_e164: &str, _code: &str) -> Result<OtpCheck, ProviderError> {
        Err(ProviderError::NotConfigured {
            reason: "no verification provider configured".into(),
        })
    }
}

// ─── Mock ───────────────────────────────────────────────────────────────

/// Handle for a paused verification. See [`MockVerificationProvider::pause_verification`].
#[derive(Debug, Clone)]
pub struct VerificationPause {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl VerificationPause {
    /// Wait until a verification call is parked on this pause.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the parked verification continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Scripted provider for tests.
///
/// Accepts exactly one code (default `123456`). Sends and verifications can
/// be switched to fail, and a verification can be parked mid-flight.
#[derive(Debug)]
pub struct MockVerificationProvider {
    accepted_code: Mutex<String>,
    fail_send: AtomicBool,
    fail_verify: AtomicBool,
    sends: AtomicU32,
    verifications: AtomicU32,
    pause: Mutex<Option<VerificationPause>>,
}

impl Default for MockVerificationProvider {
    fn default() -> Self {
        Self::accepting("123456")
    }
}

impl MockVerificationProvider {
    /// Provider that accepts `code`.
    pub fn accepting(code: impl Into<String>) -> Self {
        Self {
            accepted_code: Mutex::new(code.into()),
            fail_send: AtomicBool::new(false),
            fail_verify: AtomicBool::new(false),
            sends: AtomicU32::new(0),
            verifications: AtomicU32::new(0),
            pause: Mutex::new(None),
        }
    }

    /// Change the accepted code.
    pub fn set_accepted_code(&self, code: impl Into<String>) {
        *self.accepted_code.lock() = code.into();
    }

    /// Make `send_otp` fail.
    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Make `verify_otp` fail.
    pub fn fail_verify(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }

    /// Number of `send_otp` calls.
    pub fn send_count(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    /// Number of `verify_otp` calls.
    pub fn verify_count(&self) -> u32 {
        self.verifications.load(Ordering::SeqCst)
    }

    /// Park the next verification until [`VerificationPause::release`] is called.
    pub fn pause_verification(&self) -> VerificationPause {
        let pause = VerificationPause {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.pause.lock() = Some(pause.clone());
        pause
    }
}

#[async_trait]
impl VerificationProvider for MockVerificationProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn send_otp(&self, phone_e164: &str) -> Result<OtpDispatch, ProviderError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable {
                provider: "mock",
                reason: "send disabled".into(),
            });
        }
        Ok(OtpDispatch {
            accepted: true,
            provider_challenge_id: Some(format!("mock-{}-{}", phone_e164, self.send_count())),
        })
    }

    async fn verify_otp(&self, _phone_e164: &str, code: &str) -> Result<OtpCheck, ProviderError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        let pause = self.pause.lock().take();
        if let Some(pause) = pause {
            pause.entered.notify_one();
            pause.release.notified().await;
        }
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable {
                provider: "mock",
                reason: "verify disabled".into(),
            });
        }
        Ok(OtpCheck {
            verified: *self.accepted_code.lock() == code,
        })
    }
}
